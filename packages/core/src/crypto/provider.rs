//! Defines the CryptoProvider trait for crypto-agility.

use crate::error::CryptoError;

pub const HMAC_OUTPUT_LENGTH: usize = 32;

/// Symmetric primitives of a cipher suite used by the double ratchet.
/// Asymmetric parts (X25519, XEdDSA, ML-KEM) are fixed by the wire format
/// and live in `crypto::keys` and `crypto::kem`.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Performs AEAD encryption.
    /// `key`: The symmetric encryption key.
    /// `nonce`: The unique nonce for this encryption.
    /// `associated_data`: authenticated but not encrypted.
    fn aead_encrypt(
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Performs AEAD decryption.
    fn aead_decrypt(
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Derives `len` bytes from input key material using HKDF.
    fn hkdf_derive_key(
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, CryptoError>;

    /// HMAC over the concatenation of `parts`.
    fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_OUTPUT_LENGTH], CryptoError>;

    /// Derives a root key and a chain key from the current root key and DH output.
    fn kdf_rk(root_key: &[u8], dh_output: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError>;

    /// Derives a message key seed and the next chain key from the current chain key.
    fn kdf_ck(chain_key: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError>;

    /// Returns the SuiteID associated with this CryptoProvider.
    fn suite_id() -> u16;
}
