use thiserror::Error;

use crate::protocol::codec::DecodeError;

/// Ошибки криптографических примитивов (AEAD, KDF, входные данные)
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to generate keys: {0}")]
    KeyGenerationError(String),
    #[error("AEAD encryption failed: {0}")]
    AeadEncryptionError(String),
    #[error("AEAD decryption failed: {0}")]
    AeadDecryptionError(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),
    #[error("Invalid input: {0}")]
    InvalidInputError(String),
}

impl From<chacha20poly1305::Error> for CryptoError {
    fn from(err: chacha20poly1305::Error) -> Self {
        CryptoError::AeadEncryptionError(err.to_string())
    }
}

impl From<hkdf::InvalidLength> for CryptoError {
    fn from(err: hkdf::InvalidLength) -> Self {
        CryptoError::KeyDerivationError(err.to_string())
    }
}

/// Ошибки протокола сессий
///
/// Любая ошибка прерывает операцию до изменения сохранённого состояния.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid session state: {0}")]
    InvalidSession(String),

    #[error("Session not found for {0}")]
    SessionNotFound(String),

    #[error("Session with {0} is stale: the prekey message was never acknowledged")]
    StaleSession(String),

    #[error("Duplicate message from {address}: chain index {chain_index}, counter {counter}")]
    DuplicatedMessage {
        address: String,
        chain_index: u32,
        counter: u32,
    },

    #[error("Untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("No one-time prekey with id {0}")]
    InvalidPreKeyId(u32),

    #[error("No signed prekey with id {0}")]
    InvalidSignedPreKeyId(u32),

    #[error("No Kyber prekey with id {0}")]
    InvalidKyberPreKeyId(u32),

    #[error("Unrecognized message version {0}")]
    UnrecognizedMessageVersion(u8),

    #[error("Legacy ciphertext version {0} is not supported")]
    LegacyCiphertextVersion(u8),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Post-quantum ratchet error: {0}")]
    PqRatchet(#[from] crate::spqr::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<crate::crypto::kem::KemError> for ProtocolError {
    fn from(err: crate::crypto::kem::KemError) -> Self {
        ProtocolError::InvalidKey(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
