//! Установка сессий из prekey bundle и PreKeySignalMessage
//!
//! ```text
//! Alice                                        Bob
//! =====                                        ===
//! PreKeyBundle ──▶ process_prekey_bundle
//!   проверка подписей SPK и Kyber prekey
//!   проверка доверия IK_B
//!   PQXDH (инициатор)
//!   pending prekey = (ids, base key, now)
//!
//!        PreKeySignalMessage ─────────────────▶ process_prekey
//!                                                 проверка доверия IK_A
//!                                                 дубликат? (версия + base key)
//!                                                 загрузка prekeys
//!                                                 PQXDH (получатель)
//! ```

use std::marker::PhantomData;
use std::time::SystemTime;

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, info};

use crate::crypto::handshake::{
    initialize_alice_session, initialize_bob_session, AliceParameters, BobParameters,
    UsePqRatchet,
};
use crate::crypto::keys::{IdentityKey, KeyPair, PublicKey};
use crate::crypto::messaging::SessionRecord;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::suites::classic::ClassicSuiteProvider;
use crate::error::{ProtocolError, Result};
use crate::protocol::messages::PreKeySignalMessage;
use crate::storage::{Direction, ProtocolAddress, ProtocolStore};

/// Публичные ключи собеседника для начала сессии
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key: Option<(u32, PublicKey)>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: PublicKey,
    pub signed_pre_key_signature: Vec<u8>,
    pub identity_key: IdentityKey,
    pub kyber_pre_key: Option<KyberPreKeyBundle>,
}

#[derive(Debug, Clone)]
pub struct KyberPreKeyBundle {
    pub id: u32,
    /// Encapsulation key ML-KEM-768
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Prekeys, израсходованные входящим PreKeySignalMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreKeysUsed {
    pub one_time_pre_key_id: Option<u32>,
    pub kyber_pre_key_id: Option<u32>,
}

pub struct SessionBuilder<'a, S: ProtocolStore, P: CryptoProvider = ClassicSuiteProvider> {
    store: &'a mut S,
    remote_address: &'a ProtocolAddress,
    _provider: PhantomData<P>,
}

impl<'a, S: ProtocolStore, P: CryptoProvider> SessionBuilder<'a, S, P> {
    pub fn new(store: &'a mut S, remote_address: &'a ProtocolAddress) -> Self {
        Self {
            store,
            remote_address,
            _provider: PhantomData,
        }
    }

    /// Инициировать сессию по prekey bundle собеседника
    pub fn process_prekey_bundle<R: RngCore + CryptoRng>(
        &mut self,
        bundle: &PreKeyBundle,
        now: SystemTime,
        use_pq_ratchet: UsePqRatchet,
        rng: &mut R,
    ) -> Result<()> {
        let their_identity_key = &bundle.identity_key;

        if !self.store.is_trusted_identity(
            self.remote_address,
            their_identity_key,
            Direction::Sending,
        )? {
            return Err(ProtocolError::UntrustedIdentity(
                self.remote_address.to_string(),
            ));
        }

        if !their_identity_key.verify_signature(
            bundle.signed_pre_key_public.as_bytes(),
            &bundle.signed_pre_key_signature,
        ) {
            return Err(ProtocolError::SignatureVerificationFailed(
                "signed prekey signature".to_string(),
            ));
        }

        if let Some(kyber) = &bundle.kyber_pre_key {
            if !their_identity_key.verify_signature(&kyber.public_key, &kyber.signature) {
                return Err(ProtocolError::SignatureVerificationFailed(
                    "Kyber prekey signature".to_string(),
                ));
            }
        }

        let mut record = self
            .store
            .load_session(self.remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh);

        let our_base_key_pair = KeyPair::generate(rng);
        let our_identity_key_pair = self.store.get_identity_key_pair()?;

        let parameters = AliceParameters {
            our_identity_key_pair: &our_identity_key_pair,
            our_base_key_pair: our_base_key_pair.clone(),
            their_identity_key: *their_identity_key,
            their_signed_pre_key: bundle.signed_pre_key_public,
            their_one_time_pre_key: bundle.pre_key.map(|(_, key)| key),
            their_ratchet_key: bundle.signed_pre_key_public,
            their_kyber_pre_key: bundle
                .kyber_pre_key
                .as_ref()
                .map(|kyber| kyber.public_key.as_slice()),
            use_pq_ratchet,
        };
        let alice = initialize_alice_session::<P, R>(parameters, rng)?;
        let mut session = alice.state;

        session.set_unacknowledged_pre_key_message(
            bundle.pre_key.map(|(id, _)| id),
            bundle.signed_pre_key_id,
            &our_base_key_pair.public_key,
            now,
        );
        if let (Some(kyber), Some(ciphertext)) = (&bundle.kyber_pre_key, &alice.kyber_ciphertext) {
            session.set_unacknowledged_kyber_pre_key(kyber.id, ciphertext);
        }
        session.set_local_registration_id(self.store.get_local_registration_id()?);
        session.set_remote_registration_id(bundle.registration_id);

        self.store
            .save_identity(self.remote_address, their_identity_key)?;

        record.promote_state(session);
        self.store.store_session(self.remote_address, &record)?;

        info!(
            target: "crypto::session_builder",
            address = %self.remote_address,
            kyber = bundle.kyber_pre_key.is_some(),
            "Processed prekey bundle"
        );
        Ok(())
    }

    /// Сторона получателя: построить сессию из PreKeySignalMessage в `record`.
    ///
    /// Хранилище сессий не трогается; вызывающий код сохраняет `record`
    /// после успешной расшифровки.
    pub fn process_prekey(
        &mut self,
        message: &PreKeySignalMessage,
        record: &mut SessionRecord,
        use_pq_ratchet: UsePqRatchet,
    ) -> Result<PreKeysUsed> {
        let their_identity_key = message.identity_key();

        if !self.store.is_trusted_identity(
            self.remote_address,
            their_identity_key,
            Direction::Receiving,
        )? {
            return Err(ProtocolError::UntrustedIdentity(
                self.remote_address.to_string(),
            ));
        }

        if record.has_session_state(message.message_version(), message.base_key().as_bytes())? {
            // повторная доставка того же PreKeySignalMessage
            debug!(
                target: "crypto::session_builder",
                address = %self.remote_address,
                "Session for this base key already exists"
            );
            return Ok(PreKeysUsed::default());
        }

        let our_signed_pre_key = self
            .store
            .get_signed_pre_key(message.signed_pre_key_id())?;
        let our_one_time_pre_key = message
            .pre_key_id()
            .map(|id| self.store.get_pre_key(id))
            .transpose()?;
        let our_kyber_pre_key = message
            .kyber_pre_key_id()
            .map(|id| self.store.get_kyber_pre_key(id))
            .transpose()?;
        let our_identity_key_pair = self.store.get_identity_key_pair()?;

        let parameters = BobParameters {
            our_identity_key_pair: &our_identity_key_pair,
            our_signed_pre_key_pair: our_signed_pre_key.key_pair().clone(),
            our_one_time_pre_key_pair: our_one_time_pre_key
                .as_ref()
                .map(|record| record.key_pair().clone()),
            our_ratchet_key_pair: our_signed_pre_key.key_pair().clone(),
            our_kyber_pre_key_pair: our_kyber_pre_key.as_ref().map(|record| record.key_pair()),
            their_identity_key: *their_identity_key,
            their_base_key: *message.base_key(),
            their_kyber_ciphertext: message.kyber_ciphertext(),
            use_pq_ratchet,
        };
        let mut session = initialize_bob_session::<P>(parameters)?;

        session.set_local_registration_id(self.store.get_local_registration_id()?);
        session.set_remote_registration_id(message.registration_id());
        record.promote_state(session);

        self.store
            .save_identity(self.remote_address, their_identity_key)?;

        debug!(
            target: "crypto::session_builder",
            address = %self.remote_address,
            version = message.message_version(),
            "Built responder session from prekey message"
        );

        Ok(PreKeysUsed {
            one_time_pre_key_id: message.pre_key_id(),
            kyber_pre_key_id: message.kyber_pre_key_id(),
        })
    }
}
