//! Ключи симметричного ratchet
//!
//! ```text
//! RootKey ──create_chain(DH)──▶ RootKey', ChainKey(0)
//!
//! ChainKey(n) ──HMAC(0x02)──▶ ChainKey(n+1)
//!      │
//!      └──HMAC(0x01)──▶ seed ──HKDF(salt = SPQR key)──▶ MessageKeys(n)
//!                                                      cipher | mac | nonce
//! ```
//!
//! Пропущенные ключи хранятся как seed ([`MessageKeyGenerator`]): ключ SPQR
//! подмешивается только в момент расшифровки.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::provider::CryptoProvider;
use crate::error::{ProtocolError, Result};

const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

pub const CIPHER_KEY_LENGTH: usize = 32;
pub const MAC_KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
const MESSAGE_KEYS_LENGTH: usize = CIPHER_KEY_LENGTH + MAC_KEY_LENGTH + NONCE_LENGTH;

fn array32(bytes: &[u8], what: &str) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| {
        ProtocolError::InvalidSession(format!("{} must be 32 bytes, got {}", what, bytes.len()))
    })
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; CIPHER_KEY_LENGTH],
    mac_key: [u8; MAC_KEY_LENGTH],
    nonce: [u8; NONCE_LENGTH],
    counter: u32,
}

impl MessageKeys {
    pub fn derive_keys<P: CryptoProvider>(
        seed: &[u8],
        pqr_key: Option<&[u8]>,
        counter: u32,
    ) -> Result<Self> {
        let mut okm = P::hkdf_derive_key(pqr_key, seed, MESSAGE_KEYS_INFO, MESSAGE_KEYS_LENGTH)?;

        let mut keys = Self {
            cipher_key: [0u8; CIPHER_KEY_LENGTH],
            mac_key: [0u8; MAC_KEY_LENGTH],
            nonce: [0u8; NONCE_LENGTH],
            counter,
        };
        keys.cipher_key.copy_from_slice(&okm[..CIPHER_KEY_LENGTH]);
        keys.mac_key
            .copy_from_slice(&okm[CIPHER_KEY_LENGTH..CIPHER_KEY_LENGTH + MAC_KEY_LENGTH]);
        keys.nonce
            .copy_from_slice(&okm[CIPHER_KEY_LENGTH + MAC_KEY_LENGTH..]);
        okm.zeroize();
        Ok(keys)
    }

    pub fn cipher_key(&self) -> &[u8; CIPHER_KEY_LENGTH] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; MAC_KEY_LENGTH] {
        &self.mac_key
    }

    pub fn nonce(&self) -> &[u8; NONCE_LENGTH] {
        &self.nonce
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKeys")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Seed ключа сообщения вместе со счётчиком
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeyGenerator {
    seed: [u8; 32],
    counter: u32,
}

impl MessageKeyGenerator {
    pub fn new(seed: [u8; 32], counter: u32) -> Self {
        Self { seed, counter }
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn generate_keys<P: CryptoProvider>(&self, pqr_key: Option<&[u8]>) -> Result<MessageKeys> {
        MessageKeys::derive_keys::<P>(&self.seed, pqr_key, self.counter)
    }
}

impl fmt::Debug for MessageKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKeyGenerator(counter: {})", self.counter)
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn from_slice(key: &[u8], index: u32) -> Result<Self> {
        Ok(Self::new(array32(key, "chain key")?, index))
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn next_chain_key<P: CryptoProvider>(&self) -> Result<Self> {
        let index = self.index.checked_add(1).ok_or_else(|| {
            ProtocolError::InvalidSession("chain key index overflow".to_string())
        })?;
        let (_, next) = P::kdf_ck(&self.key)?;
        Ok(Self { key: next, index })
    }

    pub fn message_keys<P: CryptoProvider>(&self) -> Result<MessageKeyGenerator> {
        let (seed, _) = P::kdf_ck(&self.key)?;
        Ok(MessageKeyGenerator::new(seed, self.index))
    }
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainKey(index: {})", self.index)
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_slice(key: &[u8]) -> Result<Self> {
        Ok(Self::new(array32(key, "root key")?))
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// DH ratchet шаг: новый root key и цепочка с индексом 0
    pub fn create_chain<P: CryptoProvider>(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &PrivateKey,
    ) -> Result<(RootKey, ChainKey)> {
        let mut shared = our_ratchet_key.calculate_agreement(their_ratchet_key)?;
        let derived = P::kdf_rk(&self.key, &shared);
        shared.zeroize();
        let (root, chain) = derived?;
        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::crypto::suites::classic::ClassicSuiteProvider;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type Suite = ClassicSuiteProvider;

    #[test]
    fn test_chain_key_advances_forward_only() {
        let chain = ChainKey::new([3u8; 32], 0);
        let next = chain.next_chain_key::<Suite>().unwrap();
        assert_eq!(next.index(), 1);
        assert_ne!(next.key(), chain.key());

        let generator = chain.message_keys::<Suite>().unwrap();
        assert_eq!(generator.counter(), 0);
        assert_ne!(generator.seed(), next.key());
    }

    #[test]
    fn test_pqr_key_changes_message_keys() {
        let generator = ChainKey::new([9u8; 32], 5).message_keys::<Suite>().unwrap();
        let plain = generator.generate_keys::<Suite>(None).unwrap();
        let mixed = generator.generate_keys::<Suite>(Some(&[1u8; 32])).unwrap();

        assert_eq!(plain.counter(), 5);
        assert_ne!(plain.cipher_key(), mixed.cipher_key());
        assert_ne!(plain.mac_key(), mixed.mac_key());
        assert_ne!(plain.nonce(), mixed.nonce());

        let again = generator.generate_keys::<Suite>(None).unwrap();
        assert_eq!(plain.cipher_key(), again.cipher_key());
    }

    #[test]
    fn test_root_key_chain_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(21);
        let alice = KeyPair::generate(&mut rng);
        let bob = KeyPair::generate(&mut rng);
        let root = RootKey::new([5u8; 32]);

        let (alice_root, alice_chain) = root
            .create_chain::<Suite>(&bob.public_key, &alice.private_key)
            .unwrap();
        let (bob_root, bob_chain) = root
            .create_chain::<Suite>(&alice.public_key, &bob.private_key)
            .unwrap();

        assert_eq!(alice_root.key(), bob_root.key());
        assert_eq!(alice_chain, bob_chain);
        assert_eq!(alice_chain.index(), 0);
    }

    #[test]
    fn test_wrong_lengths_are_rejected() {
        assert!(ChainKey::from_slice(&[0u8; 31], 0).is_err());
        assert!(RootKey::from_slice(&[0u8; 33]).is_err());
    }
}
