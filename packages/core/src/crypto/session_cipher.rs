//! Шифрование и расшифровка сообщений сессии
//!
//! ```text
//! encrypt:
//!   sender chain ──▶ MessageKeyGenerator ─┐
//!   SPQR send    ──▶ (pq msg, pq key) ────┴─▶ MessageKeys ──▶ AEAD seal
//!   ──▶ SignalMessage (или PreKeySignalMessage, пока сессия не подтверждена)
//!
//! decrypt:
//!   current state ─┐
//!   archived[0..] ─┴─▶ клон ──▶ receiver chain / DH шаг
//!                              ──▶ SPQR recv ──▶ MessageKeys ──▶ MAC ──▶ AEAD open
//!                              ──▶ успех: клон становится текущим состоянием
//! ```
//!
//! Все операции выполняются над клонами состояния и фиксируются только
//! после успеха: продвижение SPQR необратимо.

use std::marker::PhantomData;
use std::time::SystemTime;

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::crypto::handshake::UsePqRatchet;
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::crypto::messaging::{
    ChainKey, MessageKeyGenerator, SessionRecord, SessionState, SessionUsabilityRequirements,
};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_builder::SessionBuilder;
use crate::crypto::suites::classic::ClassicSuiteProvider;
use crate::error::{ProtocolError, Result};
use crate::protocol::messages::{
    CiphertextMessage, KyberPayload, PreKeySignalMessage, SignalMessage,
};
use crate::storage::{Direction, ProtocolAddress, ProtocolStore};

/// AAD для AEAD: ratchet ключ отправителя и номер сообщения
fn associated_data(sender_ratchet_key: &PublicKey, counter: u32) -> [u8; 36] {
    let mut aad = [0u8; 36];
    aad[..32].copy_from_slice(sender_ratchet_key.as_bytes());
    aad[32..].copy_from_slice(&counter.to_be_bytes());
    aad
}

pub struct SessionCipher<'a, S: ProtocolStore, P: CryptoProvider = ClassicSuiteProvider> {
    store: &'a mut S,
    remote_address: &'a ProtocolAddress,
    _provider: PhantomData<P>,
}

impl<'a, S: ProtocolStore, P: CryptoProvider> SessionCipher<'a, S, P> {
    pub fn new(store: &'a mut S, remote_address: &'a ProtocolAddress) -> Self {
        Self {
            store,
            remote_address,
            _provider: PhantomData,
        }
    }

    pub fn encrypt<R: RngCore + CryptoRng>(
        &mut self,
        plaintext: &[u8],
        now: SystemTime,
        rng: &mut R,
    ) -> Result<CiphertextMessage> {
        let address = self.remote_address.to_string();
        let record = self
            .store
            .load_session(self.remote_address)?
            .ok_or_else(|| ProtocolError::SessionNotFound(address.clone()))?;
        let mut state = record
            .session_state()
            .cloned()
            .ok_or_else(|| ProtocolError::SessionNotFound(address.clone()))?;

        if !state.has_usable_sender_chain(now, SessionUsabilityRequirements::NOT_STALE)? {
            if state.has_sender_chain() {
                warn!(target: "crypto::session_cipher", %address, "Refusing to encrypt for stale session");
                return Err(ProtocolError::StaleSession(address));
            }
            return Err(ProtocolError::InvalidSession(format!(
                "no sender chain for {}",
                address
            )));
        }

        let chain_key = state.get_sender_chain_key()?;
        let sender_ratchet_key = state.sender_ratchet_key()?;
        let previous_counter = state.previous_counter();
        let session_version = state.session_version()?;
        let local_identity_key = state.local_identity_key()?;
        let remote_identity_key = state.remote_identity_key()?.ok_or_else(|| {
            ProtocolError::InvalidSession(format!("no remote identity for {}", address))
        })?;

        let (pq_message, pq_key) = state.pq_ratchet_send(rng)?;
        let message_keys = chain_key
            .message_keys::<P>()?
            .generate_keys::<P>(pq_key.as_deref())?;

        let ciphertext = P::aead_encrypt(
            message_keys.cipher_key(),
            message_keys.nonce(),
            plaintext,
            &associated_data(&sender_ratchet_key, chain_key.index()),
        )?;

        let message = SignalMessage::new::<P>(
            session_version,
            message_keys.mac_key(),
            sender_ratchet_key,
            chain_key.index(),
            previous_counter,
            &ciphertext,
            &local_identity_key,
            &remote_identity_key,
            &pq_message,
        )?;

        let message = match state.unacknowledged_pre_key_message_items()? {
            Some(items) => {
                let kyber_payload = match (items.kyber_pre_key_id(), items.kyber_ciphertext()) {
                    (Some(pre_key_id), Some(ciphertext)) => Some(KyberPayload {
                        pre_key_id,
                        ciphertext: ciphertext.into(),
                    }),
                    _ => None,
                };
                CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                    session_version,
                    state.local_registration_id(),
                    items.pre_key_id(),
                    items.signed_pre_key_id(),
                    kyber_payload,
                    *items.base_key(),
                    local_identity_key,
                    message,
                )?)
            }
            None => CiphertextMessage::SignalMessage(message),
        };

        state.set_sender_chain_key(&chain_key.next_chain_key::<P>()?)?;

        if !self.store.is_trusted_identity(
            self.remote_address,
            &remote_identity_key,
            Direction::Sending,
        )? {
            return Err(ProtocolError::UntrustedIdentity(address));
        }
        self.store
            .save_identity(self.remote_address, &remote_identity_key)?;

        let mut record = record;
        record.set_session_state(state);
        self.store.store_session(self.remote_address, &record)?;

        trace!(
            target: "crypto::session_cipher",
            %address,
            counter = chain_key.index(),
            pq = !pq_message.is_empty(),
            "Encrypted message"
        );
        Ok(message)
    }

    pub fn decrypt<R: RngCore + CryptoRng>(
        &mut self,
        message: &CiphertextMessage,
        use_pq_ratchet: UsePqRatchet,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        match message {
            CiphertextMessage::SignalMessage(message) => self.decrypt_signal_message(message, rng),
            CiphertextMessage::PreKeySignalMessage(message) => {
                self.decrypt_pre_key_message(message, use_pq_ratchet, rng)
            }
        }
    }

    pub fn decrypt_pre_key_message<R: RngCore + CryptoRng>(
        &mut self,
        message: &PreKeySignalMessage,
        use_pq_ratchet: UsePqRatchet,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let mut record = self
            .store
            .load_session(self.remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh);

        let pre_keys_used = SessionBuilder::<S, P>::new(&mut *self.store, self.remote_address)
            .process_prekey(message, &mut record, use_pq_ratchet)?;

        let plaintext = self.decrypt_message_with_record(&mut record, message.message(), rng)?;
        self.store.store_session(self.remote_address, &record)?;

        if let Some(pre_key_id) = pre_keys_used.one_time_pre_key_id {
            self.store.remove_pre_key(pre_key_id)?;
        }
        if let Some(kyber_pre_key_id) = pre_keys_used.kyber_pre_key_id {
            self.store.mark_kyber_pre_key_used(kyber_pre_key_id)?;
        }
        Ok(plaintext)
    }

    pub fn decrypt_signal_message<R: RngCore + CryptoRng>(
        &mut self,
        message: &SignalMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let mut record = self
            .store
            .load_session(self.remote_address)?
            .ok_or_else(|| ProtocolError::SessionNotFound(self.remote_address.to_string()))?;

        let plaintext = self.decrypt_message_with_record(&mut record, message, rng)?;

        let remote_identity_key = record
            .session_state()
            .ok_or_else(|| ProtocolError::InvalidSession("no current session".to_string()))?
            .remote_identity_key()?
            .ok_or_else(|| ProtocolError::InvalidSession("no remote identity".to_string()))?;
        if !self.store.is_trusted_identity(
            self.remote_address,
            &remote_identity_key,
            Direction::Receiving,
        )? {
            return Err(ProtocolError::UntrustedIdentity(
                self.remote_address.to_string(),
            ));
        }
        self.store
            .save_identity(self.remote_address, &remote_identity_key)?;

        self.store.store_session(self.remote_address, &record)?;
        Ok(plaintext)
    }

    fn decrypt_message_with_record<R: RngCore + CryptoRng>(
        &self,
        record: &mut SessionRecord,
        ciphertext: &SignalMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let address = self.remote_address.to_string();
        let mut errors = Vec::new();

        if let Some(current) = record.session_state() {
            let mut state = current.clone();
            match decrypt_message_with_state::<P, R>(&mut state, ciphertext, &address, rng) {
                Ok(plaintext) => {
                    trace!(target: "crypto::session_cipher", %address, "Decrypted with current session");
                    record.set_session_state(state);
                    return Ok(plaintext);
                }
                Err(e @ ProtocolError::DuplicatedMessage { .. }) => return Err(e),
                Err(e) => errors.push(e),
            }
        }

        let mut promoted = None;
        for (index, previous) in record.previous_session_states().enumerate() {
            let mut state = previous.clone();
            match decrypt_message_with_state::<P, R>(&mut state, ciphertext, &address, rng) {
                Ok(plaintext) => {
                    promoted = Some((index, state, plaintext));
                    break;
                }
                Err(e @ ProtocolError::DuplicatedMessage { .. }) => return Err(e),
                Err(e) => errors.push(e),
            }
        }

        if let Some((index, state, plaintext)) = promoted {
            debug!(
                target: "crypto::session_cipher",
                %address,
                archived_index = index,
                "Decrypted with archived session, promoting it"
            );
            record.promote_old_session(index, state)?;
            return Ok(plaintext);
        }

        warn!(
            target: "crypto::session_cipher",
            %address,
            attempts = errors.len(),
            "Message decryption failed"
        );
        Err(match errors.into_iter().next() {
            Some(first @ ProtocolError::InvalidMessage(_)) => first,
            Some(first) => ProtocolError::InvalidMessage(format!("decryption failed: {}", first)),
            None => ProtocolError::SessionNotFound(address),
        })
    }
}

fn decrypt_message_with_state<P: CryptoProvider, R: RngCore + CryptoRng>(
    state: &mut SessionState,
    ciphertext: &SignalMessage,
    address: &str,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if !state.has_sender_chain() {
        return Err(ProtocolError::InvalidSession(
            "session has no sender chain".to_string(),
        ));
    }

    let version = state.session_version()?;
    if ciphertext.message_version() != version {
        return Err(ProtocolError::InvalidMessage(format!(
            "message version {} does not match session version {}",
            ciphertext.message_version(),
            version
        )));
    }

    let their_ephemeral = ciphertext.sender_ratchet_key();
    let counter = ciphertext.counter();
    let chain_key = get_or_create_chain_key::<P, R>(state, their_ephemeral, rng)?;

    // дубликат проверяется до SPQR: повторный индекс SPQR был бы ошибкой
    if chain_key.index() > counter && !state.has_message_keys(their_ephemeral, counter) {
        return Err(ProtocolError::DuplicatedMessage {
            address: address.to_string(),
            chain_index: chain_key.index(),
            counter,
        });
    }

    let pq_key = state.pq_ratchet_recv(ciphertext.pq_ratchet())?;
    let generator =
        get_or_create_message_key::<P>(state, their_ephemeral, address, &chain_key, counter)?;
    let message_keys = generator.generate_keys::<P>(pq_key.as_deref())?;

    let local_identity_key = state.local_identity_key()?;
    let remote_identity_key = state
        .remote_identity_key()?
        .ok_or_else(|| ProtocolError::InvalidSession("no remote identity".to_string()))?;
    if !ciphertext.verify_mac::<P>(
        &remote_identity_key,
        &local_identity_key,
        message_keys.mac_key(),
    )? {
        return Err(ProtocolError::InvalidMessage(
            "MAC verification failed".to_string(),
        ));
    }

    let plaintext = P::aead_decrypt(
        message_keys.cipher_key(),
        message_keys.nonce(),
        ciphertext.body(),
        &associated_data(their_ephemeral, counter),
    )
    .map_err(|e| ProtocolError::InvalidMessage(format!("AEAD open failed: {}", e)))?;

    // собеседник ответил: сессия подтверждена
    state.clear_unacknowledged_pre_key_message();
    Ok(plaintext)
}

fn get_or_create_chain_key<P: CryptoProvider, R: RngCore + CryptoRng>(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    rng: &mut R,
) -> Result<ChainKey> {
    if let Some(chain_key) = state.get_receiver_chain_key(their_ephemeral)? {
        return Ok(chain_key);
    }

    let root_key = state.root_key()?;
    let our_ephemeral = state.sender_ratchet_private_key()?;
    let (receiver_root, receiver_chain) =
        root_key.create_chain::<P>(their_ephemeral, &our_ephemeral)?;
    let our_new_ephemeral = KeyPair::generate(rng);
    let (sender_root, sender_chain) =
        receiver_root.create_chain::<P>(their_ephemeral, &our_new_ephemeral.private_key)?;

    state.set_root_key(&sender_root);
    state.add_receiver_chain(their_ephemeral, &receiver_chain);

    let current_index = state.get_sender_chain_key()?.index();
    state.set_previous_counter(current_index.saturating_sub(1));
    state.set_sender_chain(&our_new_ephemeral, &sender_chain);

    trace!(target: "crypto::session_cipher", previous_counter = current_index.saturating_sub(1), "DH ratchet step");
    Ok(receiver_chain)
}

fn get_or_create_message_key<P: CryptoProvider>(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    address: &str,
    chain_key: &ChainKey,
    counter: u32,
) -> Result<MessageKeyGenerator> {
    let chain_index = chain_key.index();

    if chain_index > counter {
        return state
            .get_message_keys(their_ephemeral, counter)?
            .ok_or_else(|| ProtocolError::DuplicatedMessage {
                address: address.to_string(),
                chain_index,
                counter,
            });
    }

    let jump = counter - chain_index;
    let max_jump = Config::global().max_forward_jumps;
    if jump > max_jump {
        if state.session_with_self()? {
            debug!(
                target: "crypto::session_cipher",
                jump,
                "Forward jump over the limit allowed for self-session"
            );
        } else {
            return Err(ProtocolError::InvalidMessage(format!(
                "message from too far into the future: {} > {}",
                jump, max_jump
            )));
        }
    }

    let mut chain_key = chain_key.clone();
    while chain_key.index() < counter {
        state.set_message_keys(their_ephemeral, &chain_key.message_keys::<P>()?)?;
        chain_key = chain_key.next_chain_key::<P>()?;
    }

    state.set_receiver_chain_key(their_ephemeral, &chain_key.next_chain_key::<P>()?)?;
    chain_key.message_keys::<P>()
}
