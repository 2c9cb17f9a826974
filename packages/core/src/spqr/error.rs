use thiserror::Error;

use crate::crypto::kem::KemError;

/// Ошибки post-quantum ratchet (SPQR)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("failed to decode SPQR state: {0}")]
    StateDecode(String),

    #[error("failed to decode SPQR message: {0}")]
    MsgDecode(&'static str),

    #[error("unknown SPQR message version {0}")]
    UnknownVersion(u8),

    #[error("SPQR message epoch must be non-zero")]
    EpochZero,

    #[error("MAC verification failed for epoch {0}")]
    MacVerificationFailed(u64),

    #[error("encapsulation key does not match the received header")]
    EkHeaderMismatch,

    #[error("epoch {0} is out of range")]
    EpochOutOfRange(u64),

    #[error("send epoch decreased from {current} to {requested}")]
    SendKeyEpochDecreased { current: u64, requested: u64 },

    #[error("key for epoch {epoch}, index {index} was already requested")]
    KeyAlreadyRequested { epoch: u64, index: u32 },

    #[error("key index {index} jumps too far ahead of {current}")]
    KeyJump { current: u32, index: u32 },

    #[error("key index space of epoch {epoch} is exhausted")]
    ChainExhausted { epoch: u64 },

    #[error("peer does not support SPQR but the minimum version requires it")]
    MinimumVersion,

    #[error("ML-KEM error: {0}")]
    Kem(#[from] KemError),

    #[error("key derivation failed: {0}")]
    Kdf(String),
}

impl From<hkdf::InvalidLength> for Error {
    fn from(err: hkdf::InvalidLength) -> Self {
        Error::Kdf(err.to_string())
    }
}

impl From<hmac::digest::InvalidLength> for Error {
    fn from(err: hmac::digest::InvalidLength) -> Self {
        Error::Kdf(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
