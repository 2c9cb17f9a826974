//! Состояние одной ratchet сессии
//!
//! ```text
//! SessionState
//! ├── root_key, previous_counter, session_version
//! ├── sender_chain      (ratchet key pair + ChainKey)
//! ├── receiver_chains   [oldest … newest], не больше MAX_RECEIVER_CHAINS
//! │     └── message_keys [newest … oldest], не больше MAX_MESSAGE_KEYS
//! ├── pending_pre_key   до первого ответа собеседника
//! └── pq_ratchet_state  непрозрачные байты SPQR
//! ```
//!
//! Цепочки ищутся по значению публичного ratchet ключа; ссылок между
//! структурами нет.

use std::time::{Duration, SystemTime};

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, trace};

use crate::config::Config;
use crate::crypto::keys::{IdentityKey, KeyPair, PrivateKey, PublicKey};
use crate::crypto::messaging::ratchet_keys::{ChainKey, MessageKeyGenerator, RootKey};
use crate::error::{ProtocolError, Result};
use crate::protocol::codec::ProtoMessage;
use crate::protocol::messages::CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION;
use crate::protocol::structures::{
    ChainKeyStructure, ChainStructure, MessageKeyStructure, PendingPreKeyStructure,
    SessionStructure,
};
use crate::spqr;
use crate::utils::time;

/// Требования к сессии, проверяемые [`SessionState::has_usable_sender_chain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionUsabilityRequirements(u8);

impl SessionUsabilityRequirements {
    pub const NONE: Self = Self(0);
    /// Неподтверждённая сессия моложе MAX_UNACKNOWLEDGED_SESSION_AGE
    pub const NOT_STALE: Self = Self(1);
    /// Сессия создана через PQXDH (версия выше pre-Kyber)
    pub const ESTABLISHED_WITH_PQXDH: Self = Self(1 << 1);
    /// Состояние SPQR не пустое
    pub const SPQR: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SessionUsabilityRequirements {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Поля pending prekey, которые попадают в PreKeySignalMessage
#[derive(Debug, Clone)]
pub struct UnacknowledgedPreKeyMessageItems {
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: PublicKey,
    timestamp: SystemTime,
    kyber_pre_key_id: Option<u32>,
    kyber_ciphertext: Option<Vec<u8>>,
}

impl UnacknowledgedPreKeyMessageItems {
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn kyber_pre_key_id(&self) -> Option<u32> {
        self.kyber_pre_key_id
    }

    pub fn kyber_ciphertext(&self) -> Option<&[u8]> {
        self.kyber_ciphertext.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    session: SessionStructure,
}

impl SessionState {
    pub fn new(
        version: u8,
        our_identity: &IdentityKey,
        their_identity: &IdentityKey,
        root_key: &RootKey,
        alice_base_key: &PublicKey,
    ) -> Self {
        Self {
            session: SessionStructure {
                session_version: version as u32,
                local_identity_public: our_identity.serialize().to_vec(),
                remote_identity_public: their_identity.serialize().to_vec(),
                root_key: root_key.key().to_vec(),
                alice_base_key: alice_base_key.serialize().to_vec(),
                ..Default::default()
            },
        }
    }

    pub fn from_structure(session: SessionStructure) -> Self {
        Self { session }
    }

    pub fn structure(&self) -> &SessionStructure {
        &self.session
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.session.encode()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_structure(SessionStructure::decode(bytes)?))
    }

    pub fn session_version(&self) -> Result<u8> {
        match self.session.session_version {
            // старые записи не хранили версию
            0 => Ok(2),
            v => u8::try_from(v).map_err(|_| {
                ProtocolError::InvalidSession(format!("unknown session version {}", v))
            }),
        }
    }

    pub fn alice_base_key(&self) -> &[u8] {
        &self.session.alice_base_key
    }

    pub fn local_identity_key(&self) -> Result<IdentityKey> {
        IdentityKey::decode(&self.session.local_identity_public)
    }

    pub fn remote_identity_key(&self) -> Result<Option<IdentityKey>> {
        match self.session.remote_identity_public.as_slice() {
            [] => Ok(None),
            bytes => Ok(Some(IdentityKey::decode(bytes)?)),
        }
    }

    /// Сессия с самим собой (например, между своими устройствами)
    pub fn session_with_self(&self) -> Result<bool> {
        Ok(match self.remote_identity_key()? {
            Some(remote) => remote == self.local_identity_key()?,
            None => false,
        })
    }

    pub fn local_registration_id(&self) -> u32 {
        self.session.local_registration_id
    }

    pub fn set_local_registration_id(&mut self, registration_id: u32) {
        self.session.local_registration_id = registration_id;
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.session.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, registration_id: u32) {
        self.session.remote_registration_id = registration_id;
    }

    pub fn root_key(&self) -> Result<RootKey> {
        RootKey::from_slice(&self.session.root_key)
    }

    pub fn set_root_key(&mut self, root_key: &RootKey) {
        self.session.root_key = root_key.key().to_vec();
    }

    pub fn previous_counter(&self) -> u32 {
        self.session.previous_counter
    }

    pub fn set_previous_counter(&mut self, counter: u32) {
        self.session.previous_counter = counter;
    }

    // === Sender chain ===

    pub fn has_sender_chain(&self) -> bool {
        self.session.sender_chain.is_some()
    }

    fn sender_chain(&self) -> Result<&ChainStructure> {
        self.session
            .sender_chain
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidSession("no sender chain".to_string()))
    }

    pub fn sender_ratchet_key(&self) -> Result<PublicKey> {
        PublicKey::deserialize(&self.sender_chain()?.sender_ratchet_key)
    }

    pub fn sender_ratchet_private_key(&self) -> Result<PrivateKey> {
        PrivateKey::deserialize(&self.sender_chain()?.sender_ratchet_key_private)
    }

    pub fn get_sender_chain_key(&self) -> Result<ChainKey> {
        let chain_key = self.sender_chain()?.chain_key.as_ref().ok_or_else(|| {
            ProtocolError::InvalidSession("sender chain without chain key".to_string())
        })?;
        ChainKey::from_slice(&chain_key.key, chain_key.index)
    }

    pub fn set_sender_chain(&mut self, sender: &KeyPair, chain_key: &ChainKey) {
        self.session.sender_chain = Some(ChainStructure {
            sender_ratchet_key: sender.public_key.serialize().to_vec(),
            sender_ratchet_key_private: sender.private_key.serialize().to_vec(),
            chain_key: Some(chain_key_structure(chain_key)),
            message_keys: Vec::new(),
        });
    }

    pub fn set_sender_chain_key(&mut self, next_chain_key: &ChainKey) -> Result<()> {
        let chain = self
            .session
            .sender_chain
            .as_mut()
            .ok_or_else(|| ProtocolError::InvalidSession("no sender chain".to_string()))?;
        chain.chain_key = Some(chain_key_structure(next_chain_key));
        Ok(())
    }

    // === Receiver chains ===

    fn receiver_chain_index(&self, sender: &PublicKey) -> Option<usize> {
        self.session
            .receiver_chains
            .iter()
            .position(|chain| chain.sender_ratchet_key.as_slice() == sender.as_bytes())
    }

    pub fn get_receiver_chain_key(&self, sender: &PublicKey) -> Result<Option<ChainKey>> {
        let Some(index) = self.receiver_chain_index(sender) else {
            return Ok(None);
        };
        match &self.session.receiver_chains[index].chain_key {
            Some(chain_key) => Ok(Some(ChainKey::from_slice(&chain_key.key, chain_key.index)?)),
            None => Err(ProtocolError::InvalidSession(
                "receiver chain without chain key".to_string(),
            )),
        }
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.session.receiver_chains.len()
    }

    /// Добавить receiver chain; самая старая вытесняется сверх лимита
    pub fn add_receiver_chain(&mut self, sender: &PublicKey, chain_key: &ChainKey) {
        self.session.receiver_chains.push(ChainStructure {
            sender_ratchet_key: sender.serialize().to_vec(),
            sender_ratchet_key_private: Vec::new(),
            chain_key: Some(chain_key_structure(chain_key)),
            message_keys: Vec::new(),
        });

        let max_chains = Config::global().max_receiver_chains;
        if self.session.receiver_chains.len() > max_chains {
            let excess = self.session.receiver_chains.len() - max_chains;
            debug!(
                target: "crypto::session_state",
                evicted = excess,
                "Dropping oldest receiver chains"
            );
            self.session.receiver_chains.drain(..excess);
        }
    }

    pub fn set_receiver_chain_key(&mut self, sender: &PublicKey, chain_key: &ChainKey) -> Result<()> {
        let index = self.receiver_chain_index(sender).ok_or_else(|| {
            ProtocolError::InvalidSession("no receiver chain for ratchet key".to_string())
        })?;
        self.session.receiver_chains[index].chain_key = Some(chain_key_structure(chain_key));
        Ok(())
    }

    pub fn has_message_keys(&self, sender: &PublicKey, counter: u32) -> bool {
        self.receiver_chain_index(sender)
            .map(|index| {
                self.session.receiver_chains[index]
                    .message_keys
                    .iter()
                    .any(|key| key.index == counter)
            })
            .unwrap_or(false)
    }

    /// Извлечь сохранённый ключ пропущенного сообщения; ключ удаляется
    pub fn get_message_keys(
        &mut self,
        sender: &PublicKey,
        counter: u32,
    ) -> Result<Option<MessageKeyGenerator>> {
        let Some(chain_index) = self.receiver_chain_index(sender) else {
            return Ok(None);
        };
        let keys = &mut self.session.receiver_chains[chain_index].message_keys;
        let Some(position) = keys.iter().position(|key| key.index == counter) else {
            return Ok(None);
        };
        let removed = keys.remove(position);
        let seed: [u8; 32] = removed.seed.as_slice().try_into().map_err(|_| {
            ProtocolError::InvalidSession("stored message key seed must be 32 bytes".to_string())
        })?;
        Ok(Some(MessageKeyGenerator::new(seed, removed.index)))
    }

    /// Сохранить ключ пропущенного сообщения (новые в начале списка)
    pub fn set_message_keys(
        &mut self,
        sender: &PublicKey,
        generator: &MessageKeyGenerator,
    ) -> Result<()> {
        let chain_index = self.receiver_chain_index(sender).ok_or_else(|| {
            ProtocolError::InvalidSession("no receiver chain for ratchet key".to_string())
        })?;
        let keys = &mut self.session.receiver_chains[chain_index].message_keys;
        keys.insert(
            0,
            MessageKeyStructure {
                index: generator.counter(),
                seed: generator.seed().to_vec(),
            },
        );

        let max_keys = Config::global().max_message_keys;
        if keys.len() > max_keys {
            trace!(target: "crypto::session_state", max_keys, "Evicting oldest message keys");
            keys.truncate(max_keys);
        }
        Ok(())
    }

    // === Pending prekey ===

    pub fn set_unacknowledged_pre_key_message(
        &mut self,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: &PublicKey,
        now: SystemTime,
    ) {
        let pending = self
            .session
            .pending_pre_key
            .get_or_insert_with(PendingPreKeyStructure::default);
        pending.pre_key_id = pre_key_id;
        pending.signed_pre_key_id = signed_pre_key_id;
        pending.base_key = base_key.serialize().to_vec();
        pending.timestamp = time::millis_since_epoch(now);
    }

    pub fn set_unacknowledged_kyber_pre_key(&mut self, kyber_pre_key_id: u32, ciphertext: &[u8]) {
        let pending = self
            .session
            .pending_pre_key
            .get_or_insert_with(PendingPreKeyStructure::default);
        pending.kyber_pre_key_id = Some(kyber_pre_key_id);
        pending.kyber_ciphertext = Some(ciphertext.to_vec());
    }

    pub fn unacknowledged_pre_key_message_items(
        &self,
    ) -> Result<Option<UnacknowledgedPreKeyMessageItems>> {
        let Some(pending) = &self.session.pending_pre_key else {
            return Ok(None);
        };
        Ok(Some(UnacknowledgedPreKeyMessageItems {
            pre_key_id: pending.pre_key_id,
            signed_pre_key_id: pending.signed_pre_key_id,
            base_key: PublicKey::deserialize(&pending.base_key)?,
            timestamp: time::from_millis(pending.timestamp),
            kyber_pre_key_id: pending.kyber_pre_key_id,
            kyber_ciphertext: pending.kyber_ciphertext.clone(),
        }))
    }

    pub fn clear_unacknowledged_pre_key_message(&mut self) {
        self.session.pending_pre_key = None;
    }

    // === Usability ===

    pub fn has_usable_sender_chain(
        &self,
        now: SystemTime,
        requirements: SessionUsabilityRequirements,
    ) -> Result<bool> {
        if !self.has_sender_chain() {
            return Ok(false);
        }

        if requirements.contains(SessionUsabilityRequirements::NOT_STALE) {
            if let Some(pending) = &self.session.pending_pre_key {
                let created = time::from_millis(pending.timestamp);
                let max_age =
                    Duration::from_millis(Config::global().max_unacknowledged_session_age_ms);
                // время до создания сессии считается нулевым возрастом
                let age = now.duration_since(created).unwrap_or(Duration::ZERO);
                if age > max_age {
                    debug!(
                        target: "crypto::session_state",
                        age_ms = age.as_millis() as u64,
                        "Unacknowledged session is stale"
                    );
                    return Ok(false);
                }
            }
        }

        if requirements.contains(SessionUsabilityRequirements::ESTABLISHED_WITH_PQXDH)
            && self.session_version()? <= CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION
        {
            return Ok(false);
        }

        if requirements.contains(SessionUsabilityRequirements::SPQR)
            && self.session.pq_ratchet_state.is_empty()
        {
            return Ok(false);
        }

        Ok(true)
    }

    // === SPQR ===

    pub fn pq_ratchet_state(&self) -> &[u8] {
        &self.session.pq_ratchet_state
    }

    pub fn set_pq_ratchet_state(&mut self, state: Vec<u8>) {
        self.session.pq_ratchet_state = state;
    }

    /// Продвинуть SPQR на отправку: сообщение SPQR и необязательный ключ
    pub fn pq_ratchet_send<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let spqr::Send { state, msg, key } = spqr::send(&self.session.pq_ratchet_state, rng)?;
        self.session.pq_ratchet_state = state;
        Ok((msg, key))
    }

    pub fn pq_ratchet_recv(&mut self, msg: &[u8]) -> Result<Option<Vec<u8>>> {
        let spqr::Recv { state, key } = spqr::recv(&self.session.pq_ratchet_state, msg)?;
        self.session.pq_ratchet_state = state;
        Ok(key)
    }
}

fn chain_key_structure(chain_key: &ChainKey) -> ChainKeyStructure {
    ChainKeyStructure {
        index: chain_key.index(),
        key: chain_key.key().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeyPair;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state(rng: &mut StdRng, version: u8) -> SessionState {
        let ours = IdentityKeyPair::generate(rng);
        let theirs = IdentityKeyPair::generate(rng);
        let base = KeyPair::generate(rng);
        SessionState::new(
            version,
            ours.identity_key(),
            theirs.identity_key(),
            &RootKey::new([1u8; 32]),
            &base.public_key,
        )
    }

    #[test]
    fn test_missing_chains_are_errors() {
        let mut rng = StdRng::seed_from_u64(30);
        let state = state(&mut rng, 4);
        assert!(!state.has_sender_chain());
        assert!(matches!(
            state.get_sender_chain_key(),
            Err(ProtocolError::InvalidSession(_))
        ));
        let key = KeyPair::generate(&mut rng).public_key;
        assert!(state.get_receiver_chain_key(&key).unwrap().is_none());
    }

    #[test]
    fn test_receiver_chains_are_capped() {
        let mut rng = StdRng::seed_from_u64(31);
        let mut state = state(&mut rng, 4);
        let keys: Vec<PublicKey> = (0..7).map(|_| KeyPair::generate(&mut rng).public_key).collect();
        for key in &keys {
            state.add_receiver_chain(key, &ChainKey::new([2u8; 32], 0));
        }
        assert_eq!(state.receiver_chain_count(), 5);
        assert!(state.get_receiver_chain_key(&keys[0]).unwrap().is_none());
        assert!(state.get_receiver_chain_key(&keys[1]).unwrap().is_none());
        assert!(state.get_receiver_chain_key(&keys[6]).unwrap().is_some());
    }

    #[test]
    fn test_message_keys_are_one_time() {
        let mut rng = StdRng::seed_from_u64(32);
        let mut state = state(&mut rng, 4);
        let sender = KeyPair::generate(&mut rng).public_key;
        state.add_receiver_chain(&sender, &ChainKey::new([2u8; 32], 0));

        let generator = MessageKeyGenerator::new([9u8; 32], 3);
        state.set_message_keys(&sender, &generator).unwrap();
        assert!(state.has_message_keys(&sender, 3));

        assert_eq!(state.get_message_keys(&sender, 3).unwrap(), Some(generator));
        assert_eq!(state.get_message_keys(&sender, 3).unwrap(), None);
        assert!(!state.has_message_keys(&sender, 3));
    }

    #[test]
    fn test_message_key_cache_is_bounded() {
        let mut rng = StdRng::seed_from_u64(33);
        let mut state = state(&mut rng, 4);
        let sender = KeyPair::generate(&mut rng).public_key;
        state.add_receiver_chain(&sender, &ChainKey::new([2u8; 32], 0));

        let max_keys = Config::global().max_message_keys as u32;
        for counter in 0..max_keys + 3 {
            state
                .set_message_keys(&sender, &MessageKeyGenerator::new([1u8; 32], counter))
                .unwrap();
        }
        // вытесняются самые старые
        assert!(!state.has_message_keys(&sender, 0));
        assert!(!state.has_message_keys(&sender, 2));
        assert!(state.has_message_keys(&sender, 3));
        assert!(state.has_message_keys(&sender, max_keys + 2));
    }

    #[test]
    fn test_usability_requirements() {
        let mut rng = StdRng::seed_from_u64(34);
        let now = time::from_millis(1_700_000_000_000);
        let mut state = state(&mut rng, 3);
        assert!(!state
            .has_usable_sender_chain(now, SessionUsabilityRequirements::NONE)
            .unwrap());

        let sender = KeyPair::generate(&mut rng);
        state.set_sender_chain(&sender, &ChainKey::new([4u8; 32], 0));
        state.set_unacknowledged_pre_key_message(Some(1), 2, &sender.public_key, now);

        assert!(state
            .has_usable_sender_chain(now, SessionUsabilityRequirements::NOT_STALE)
            .unwrap());
        let later = now + Duration::from_secs(31 * 24 * 60 * 60);
        assert!(!state
            .has_usable_sender_chain(later, SessionUsabilityRequirements::NOT_STALE)
            .unwrap());
        assert!(state
            .has_usable_sender_chain(later, SessionUsabilityRequirements::NONE)
            .unwrap());

        assert!(!state
            .has_usable_sender_chain(now, SessionUsabilityRequirements::ESTABLISHED_WITH_PQXDH)
            .unwrap());
        assert!(!state
            .has_usable_sender_chain(now, SessionUsabilityRequirements::SPQR)
            .unwrap());

        state.clear_unacknowledged_pre_key_message();
        assert!(state
            .has_usable_sender_chain(later, SessionUsabilityRequirements::NOT_STALE)
            .unwrap());
    }

    #[test]
    fn test_serialization_keeps_every_field() {
        let mut rng = StdRng::seed_from_u64(35);
        let now = time::from_millis(1_700_000_000_000);
        let mut state = state(&mut rng, 4);
        let sender = KeyPair::generate(&mut rng);
        state.set_sender_chain(&sender, &ChainKey::new([4u8; 32], 12));
        state.add_receiver_chain(&sender.public_key, &ChainKey::new([5u8; 32], 3));
        state
            .set_message_keys(&sender.public_key, &MessageKeyGenerator::new([6u8; 32], 1))
            .unwrap();
        state.set_unacknowledged_pre_key_message(None, 7, &sender.public_key, now);
        state.set_unacknowledged_kyber_pre_key(8, &[0xcc; 1088]);
        state.set_pq_ratchet_state(vec![1, 2, 3, 4]);
        state.set_local_registration_id(11);
        state.set_remote_registration_id(22);
        state.set_previous_counter(5);

        let restored = SessionState::deserialize(&state.serialize()).unwrap();
        assert_eq!(restored.structure(), state.structure());
        assert_eq!(restored.get_sender_chain_key().unwrap().index(), 12);

        let items = restored.unacknowledged_pre_key_message_items().unwrap().unwrap();
        assert_eq!(items.pre_key_id(), None);
        assert_eq!(items.signed_pre_key_id(), 7);
        assert_eq!(items.kyber_pre_key_id(), Some(8));
        assert_eq!(items.kyber_ciphertext().map(<[u8]>::len), Some(1088));
        assert_eq!(items.timestamp(), now);

        for requirements in [
            SessionUsabilityRequirements::NOT_STALE,
            SessionUsabilityRequirements::ESTABLISHED_WITH_PQXDH
                | SessionUsabilityRequirements::SPQR,
        ] {
            assert_eq!(
                restored.has_usable_sender_chain(now, requirements).unwrap(),
                state.has_usable_sender_chain(now, requirements).unwrap()
            );
        }
    }
}
