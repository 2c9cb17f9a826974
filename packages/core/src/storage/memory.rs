// In-memory хранилище для тестов и простых клиентов
//
// Записи хранятся сериализованными, как в постоянном хранилище: каждая
// загрузка возвращает независимую копию.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::crypto::keys::{IdentityKey, IdentityKeyPair};
use crate::crypto::messaging::SessionRecord;
use crate::error::{ProtocolError, Result};
use crate::storage::models::*;
use crate::storage::{
    IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore,
};

/// In-memory хранилище всех ключей и сессий одной стороны
pub struct InMemoryProtocolStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    known_identities: HashMap<ProtocolAddress, IdentityKey>,
    pre_keys: HashMap<u32, Vec<u8>>,
    signed_pre_keys: HashMap<u32, Vec<u8>>,
    kyber_pre_keys: HashMap<u32, Vec<u8>>,
    used_kyber_pre_keys: HashSet<u32>,
    sessions: HashMap<ProtocolAddress, Vec<u8>>,
}

impl InMemoryProtocolStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            known_identities: HashMap::new(),
            pre_keys: HashMap::new(),
            signed_pre_keys: HashMap::new(),
            kyber_pre_keys: HashMap::new(),
            used_kyber_pre_keys: HashSet::new(),
            sessions: HashMap::new(),
        }
    }

    // === Утилиты ===

    pub fn has_pre_key(&self, pre_key_id: u32) -> bool {
        self.pre_keys.contains_key(&pre_key_id)
    }

    pub fn is_kyber_pre_key_used(&self, kyber_pre_key_id: u32) -> bool {
        self.used_kyber_pre_keys.contains(&kyber_pre_key_id)
    }

    pub fn delete_session(&mut self, address: &ProtocolAddress) {
        self.sessions.remove(address);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl IdentityKeyStore for InMemoryProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity_key_pair.clone())
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<IdentityChange> {
        match self.known_identities.insert(address.clone(), *identity) {
            Some(previous) if previous != *identity => {
                warn!(target: "storage::memory", %address, "Identity key replaced");
                Ok(IdentityChange::ReplacedExisting)
            }
            _ => Ok(IdentityChange::NewOrUnchanged),
        }
    }

    /// Trust on first use: неизвестный адрес доверен, известный только со своим ключом
    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool> {
        Ok(match self.known_identities.get(address) {
            Some(known) => known == identity,
            None => true,
        })
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        Ok(self.known_identities.get(address).copied())
    }
}

impl PreKeyStore for InMemoryProtocolStore {
    fn get_pre_key(&self, pre_key_id: u32) -> Result<PreKeyRecord> {
        let bytes = self
            .pre_keys
            .get(&pre_key_id)
            .ok_or(ProtocolError::InvalidPreKeyId(pre_key_id))?;
        PreKeyRecord::deserialize(bytes)
    }

    fn save_pre_key(&mut self, pre_key_id: u32, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.insert(pre_key_id, record.serialize());
        Ok(())
    }

    fn remove_pre_key(&mut self, pre_key_id: u32) -> Result<()> {
        self.pre_keys.remove(&pre_key_id);
        debug!(target: "storage::memory", pre_key_id, "Removed one-time prekey");
        Ok(())
    }
}

impl SignedPreKeyStore for InMemoryProtocolStore {
    fn get_signed_pre_key(&self, signed_pre_key_id: u32) -> Result<SignedPreKeyRecord> {
        let bytes = self
            .signed_pre_keys
            .get(&signed_pre_key_id)
            .ok_or(ProtocolError::InvalidSignedPreKeyId(signed_pre_key_id))?;
        SignedPreKeyRecord::deserialize(bytes)
    }

    fn save_signed_pre_key(
        &mut self,
        signed_pre_key_id: u32,
        record: &SignedPreKeyRecord,
    ) -> Result<()> {
        self.signed_pre_keys
            .insert(signed_pre_key_id, record.serialize());
        Ok(())
    }
}

impl KyberPreKeyStore for InMemoryProtocolStore {
    fn get_kyber_pre_key(&self, kyber_pre_key_id: u32) -> Result<KyberPreKeyRecord> {
        let bytes = self
            .kyber_pre_keys
            .get(&kyber_pre_key_id)
            .ok_or(ProtocolError::InvalidKyberPreKeyId(kyber_pre_key_id))?;
        KyberPreKeyRecord::deserialize(bytes)
    }

    fn save_kyber_pre_key(
        &mut self,
        kyber_pre_key_id: u32,
        record: &KyberPreKeyRecord,
    ) -> Result<()> {
        self.kyber_pre_keys
            .insert(kyber_pre_key_id, record.serialize());
        Ok(())
    }

    fn mark_kyber_pre_key_used(&mut self, kyber_pre_key_id: u32) -> Result<()> {
        self.used_kyber_pre_keys.insert(kyber_pre_key_id);
        Ok(())
    }
}

impl SessionStore for InMemoryProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.sessions
            .get(address)
            .map(|bytes| SessionRecord::deserialize(bytes))
            .transpose()
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.insert(address.clone(), record.serialize());
        Ok(())
    }
}
