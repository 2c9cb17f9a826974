//! Ключи X25519 и identity ключи
//!
//! - [`PublicKey`] / [`PrivateKey`] / [`KeyPair`]: ratchet и prekey ключи
//! - [`IdentityKey`] / [`IdentityKeyPair`]: долговременный ключ корреспондента,
//!   который никогда не может быть точкой малого порядка
//!
//! Подписи (XEdDSA) делаются теми же ключами X25519.

use std::fmt;

use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::xeddsa;
use crate::error::{ProtocolError, Result};
use crate::protocol::codec::{FieldValue, ProtoReader, ProtoWriter};

pub const KEY_LENGTH: usize = 32;

/// p = 2^255 - 19, little-endian
const FIELD_PRIME: [u8; 32] = [
    0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x7f,
];

/// Сравнение байтов за постоянное время
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn clamp(mut bytes: [u8; 32]) -> [u8; 32] {
    bytes[0] &= 248;
    bytes[31] &= 127;
    bytes[31] |= 64;
    bytes
}

fn key_array(bytes: &[u8], what: &str) -> Result<[u8; KEY_LENGTH]> {
    bytes.try_into().map_err(|_| {
        ProtocolError::InvalidKey(format!(
            "{} must be {} bytes, got {}",
            what,
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

/// Публичный ключ X25519 (Montgomery u-координата)
#[derive(Clone, Copy, Eq, Hash)]
pub struct PublicKey([u8; KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self(key_array(bytes, "public key")?))
    }

    pub fn serialize(&self) -> [u8; KEY_LENGTH] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Каноническая кодировка: старший бит сброшен и u < p
    pub fn is_canonical(&self) -> bool {
        if self.0[31] & 0x80 != 0 {
            return false;
        }
        for i in (0..KEY_LENGTH).rev() {
            if self.0[i] != FIELD_PRIME[i] {
                return self.0[i] < FIELD_PRIME[i];
            }
        }
        false
    }

    /// Точка малого порядка: 8·P даёт нейтральный элемент
    pub fn is_low_order(&self) -> bool {
        let eight = Scalar::from(8u8);
        let product = &MontgomeryPoint(self.0) * &eight;
        bool::from(product.as_bytes().ct_eq(&[0u8; KEY_LENGTH]))
    }

    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        xeddsa::verify(&self.0, message, signature)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Приватный скаляр X25519 (хранится уже clamped)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_LENGTH]);

impl PrivateKey {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rng.fill_bytes(&mut bytes);
        let key = Self(clamp(bytes));
        bytes.zeroize();
        key
    }

    /// Любые 32 байта являются допустимым скаляром после clamping
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self(clamp(key_array(bytes, "private key")?)))
    }

    pub fn serialize(&self) -> [u8; KEY_LENGTH] {
        self.0
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(DalekPublicKey::from(&secret).to_bytes())
    }

    /// Raw X25519. Отказ, если результат нулевой (точка малого порядка).
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> Result<[u8; KEY_LENGTH]> {
        let secret = StaticSecret::from(self.0);
        let shared = secret.diffie_hellman(&DalekPublicKey::from(their_key.0));
        if !shared.was_contributory() {
            return Err(ProtocolError::InvalidKey(
                "agreement with a low-order public key".to_string(),
            ));
        }
        Ok(shared.to_bytes())
    }

    pub fn calculate_signature(&self, message: &[u8]) -> [u8; xeddsa::SIGNATURE_LENGTH] {
        xeddsa::sign(&self.0, message)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Пара ключей X25519 для ratchet шагов и prekeys
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private(PrivateKey::generate(rng))
    }

    pub fn new(public_key: PublicKey, private_key: PrivateKey) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    pub fn from_private(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    pub fn from_public_and_private(public_key: &[u8], private_key: &[u8]) -> Result<Self> {
        Ok(Self::new(
            PublicKey::deserialize(public_key)?,
            PrivateKey::deserialize(private_key)?,
        ))
    }

    pub fn calculate_agreement(&self, their_key: &PublicKey) -> Result<[u8; KEY_LENGTH]> {
        self.private_key.calculate_agreement(their_key)
    }

    pub fn calculate_signature(&self, message: &[u8]) -> [u8; xeddsa::SIGNATURE_LENGTH] {
        self.private_key.calculate_signature(message)
    }
}

/// Долговременный публичный identity ключ
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    public_key: PublicKey,
}

impl IdentityKey {
    pub fn new(public_key: PublicKey) -> Result<Self> {
        if public_key.is_low_order() {
            return Err(ProtocolError::InvalidKey(
                "identity key is a low-order point".to_string(),
            ));
        }
        Ok(Self { public_key })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::new(PublicKey::deserialize(bytes)?)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn serialize(&self) -> [u8; KEY_LENGTH] {
        self.public_key.serialize()
    }

    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        self.public_key.verify_signature(message, signature)
    }
}

/// Identity ключ вместе с приватным скаляром
#[derive(Clone, Debug)]
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    private_key: PrivateKey,
}

impl IdentityKeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private_key = PrivateKey::generate(rng);
        // clamped скаляр всегда даёт точку простого порядка
        let identity_key = IdentityKey {
            public_key: private_key.public_key(),
        };
        Self {
            identity_key,
            private_key,
        }
    }

    pub fn new(identity_key: IdentityKey, private_key: PrivateKey) -> Self {
        Self {
            identity_key,
            private_key,
        }
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn public_key(&self) -> &PublicKey {
        self.identity_key.public_key()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn sign(&self, message: &[u8]) -> [u8; xeddsa::SIGNATURE_LENGTH] {
        self.private_key.calculate_signature(message)
    }

    /// IdentityKeyPairStructure { 1: public_key, 2: private_key }
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer
            .bytes(1, &self.identity_key.serialize())
            .bytes(2, &self.private_key.serialize());
        writer.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut public_key = None;
        let mut private_key = None;
        for field in ProtoReader::new(bytes) {
            match field? {
                (1, FieldValue::Bytes(b)) => public_key = Some(IdentityKey::decode(b)?),
                (2, FieldValue::Bytes(b)) => private_key = Some(PrivateKey::deserialize(b)?),
                _ => {}
            }
        }
        match (public_key, private_key) {
            (Some(identity_key), Some(private_key)) => Ok(Self::new(identity_key, private_key)),
            _ => Err(ProtocolError::InvalidKey(
                "identity key pair is missing a component".to_string(),
            )),
        }
    }
}
