// Модели данных для хранилища: адреса корреспондентов и prekey записи

use std::fmt;
use std::time::SystemTime;

use rand_core::{CryptoRng, RngCore};

use crate::crypto::kem;
use crate::crypto::keys::{IdentityKeyPair, KeyPair, PublicKey};
use crate::error::{ProtocolError, Result};
use crate::protocol::codec::ProtoMessage;
use crate::protocol::structures::{
    KyberPreKeyRecordStructure, PreKeyRecordStructure, SignedPreKeyRecordStructure,
};
use crate::utils::time;

/// Адрес корреспондента: имя и номер устройства
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Направление использования identity при проверке доверия
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Результат сохранения identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    NewOrUnchanged,
    ReplacedExisting,
}

/// One-time prekey
#[derive(Debug, Clone)]
pub struct PreKeyRecord {
    id: u32,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: u32, key_pair: &KeyPair) -> Self {
        Self {
            id,
            key_pair: key_pair.clone(),
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(id: u32, rng: &mut R) -> Self {
        Self {
            id,
            key_pair: KeyPair::generate(rng),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn serialize(&self) -> Vec<u8> {
        PreKeyRecordStructure {
            id: self.id,
            public_key: self.key_pair.public_key.serialize().to_vec(),
            private_key: self.key_pair.private_key.serialize().to_vec(),
        }
        .encode()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let record = PreKeyRecordStructure::decode(bytes)?;
        Ok(Self {
            id: record.id,
            key_pair: KeyPair::from_public_and_private(&record.public_key, &record.private_key)?,
        })
    }
}

/// Signed prekey: подпись identity ключом над публичным ключом
#[derive(Debug, Clone)]
pub struct SignedPreKeyRecord {
    id: u32,
    key_pair: KeyPair,
    signature: Vec<u8>,
    timestamp: SystemTime,
}

impl SignedPreKeyRecord {
    pub fn new(id: u32, timestamp: SystemTime, key_pair: &KeyPair, signature: &[u8]) -> Self {
        Self {
            id,
            key_pair: key_pair.clone(),
            signature: signature.to_vec(),
            timestamp,
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(
        id: u32,
        identity_key_pair: &IdentityKeyPair,
        timestamp: SystemTime,
        rng: &mut R,
    ) -> Self {
        let key_pair = KeyPair::generate(rng);
        let signature = identity_key_pair.sign(key_pair.public_key.as_bytes());
        Self::new(id, timestamp, &key_pair, &signature)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn serialize(&self) -> Vec<u8> {
        SignedPreKeyRecordStructure {
            id: self.id,
            public_key: self.key_pair.public_key.serialize().to_vec(),
            private_key: self.key_pair.private_key.serialize().to_vec(),
            signature: self.signature.clone(),
            timestamp: time::millis_since_epoch(self.timestamp),
        }
        .encode()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let record = SignedPreKeyRecordStructure::decode(bytes)?;
        Ok(Self {
            id: record.id,
            key_pair: KeyPair::from_public_and_private(&record.public_key, &record.private_key)?,
            signature: record.signature,
            timestamp: time::from_millis(record.timestamp),
        })
    }
}

/// Kyber prekey: пара ключей ML-KEM-768, подписанная identity ключом
#[derive(Clone)]
pub struct KyberPreKeyRecord {
    id: u32,
    key_pair: kem::KeyPair,
    signature: Vec<u8>,
    timestamp: SystemTime,
}

impl fmt::Debug for KyberPreKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KyberPreKeyRecord")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl KyberPreKeyRecord {
    pub fn new(id: u32, timestamp: SystemTime, key_pair: &kem::KeyPair, signature: &[u8]) -> Self {
        Self {
            id,
            key_pair: key_pair.clone(),
            signature: signature.to_vec(),
            timestamp,
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(
        id: u32,
        identity_key_pair: &IdentityKeyPair,
        timestamp: SystemTime,
        rng: &mut R,
    ) -> Self {
        let key_pair = kem::KeyPair::generate(rng);
        let signature = identity_key_pair.sign(&key_pair.encapsulation_key);
        Self::new(id, timestamp, &key_pair, &signature)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key_pair(&self) -> &kem::KeyPair {
        &self.key_pair
    }

    pub fn encapsulation_key(&self) -> &[u8] {
        &self.key_pair.encapsulation_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn serialize(&self) -> Vec<u8> {
        KyberPreKeyRecordStructure {
            id: self.id,
            public_key: self.key_pair.encapsulation_key.clone(),
            private_key: self.key_pair.decapsulation_key.clone(),
            signature: self.signature.clone(),
            timestamp: time::millis_since_epoch(self.timestamp),
        }
        .encode()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let record = KyberPreKeyRecordStructure::decode(bytes)?;
        if record.public_key.len() != kem::ENCAPSULATION_KEY_LENGTH
            || record.private_key.len() != kem::DECAPSULATION_KEY_LENGTH
        {
            return Err(ProtocolError::InvalidKey(format!(
                "Kyber prekey {} has invalid key lengths",
                record.id
            )));
        }
        Ok(Self {
            id: record.id,
            key_pair: kem::KeyPair {
                encapsulation_key: record.public_key,
                decapsulation_key: record.private_key,
            },
            signature: record.signature,
            timestamp: time::from_millis(record.timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_address_display() {
        let address = ProtocolAddress::new("alice", 2);
        assert_eq!(address.to_string(), "alice.2");
        assert_eq!(address.name(), "alice");
        assert_eq!(address.device_id(), 2);
    }

    #[test]
    fn test_pre_key_record_codec() {
        let mut rng = StdRng::seed_from_u64(60);
        let record = PreKeyRecord::generate(17, &mut rng);
        let restored = PreKeyRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(restored.id(), 17);
        assert_eq!(restored.public_key(), record.public_key());
        assert!(PreKeyRecord::deserialize(&[0x12, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_signed_pre_key_signature_verifies() {
        let mut rng = StdRng::seed_from_u64(61);
        let identity = IdentityKeyPair::generate(&mut rng);
        let now = time::from_millis(1_700_000_000_000);
        let record = SignedPreKeyRecord::generate(3, &identity, now, &mut rng);

        let restored = SignedPreKeyRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(restored.timestamp(), now);
        assert!(identity
            .identity_key()
            .verify_signature(restored.public_key().as_bytes(), restored.signature()));
    }

    #[test]
    fn test_kyber_pre_key_record_codec() {
        let mut rng = StdRng::seed_from_u64(62);
        let identity = IdentityKeyPair::generate(&mut rng);
        let now = time::from_millis(1_700_000_000_000);
        let record = KyberPreKeyRecord::generate(5, &identity, now, &mut rng);

        let restored = KyberPreKeyRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(restored.id(), 5);
        assert_eq!(restored.encapsulation_key(), record.encapsulation_key());
        assert!(identity
            .identity_key()
            .verify_signature(restored.encapsulation_key(), restored.signature()));

        let (ciphertext, sent) = kem::encapsulate(restored.encapsulation_key(), &mut rng).unwrap();
        let received =
            kem::decapsulate(&restored.key_pair().decapsulation_key, &ciphertext).unwrap();
        assert_eq!(sent, received);
    }
}
