// Construct SPQR
// Double ratchet сессии с X3DH/PQXDH и Sparse Post-Quantum Ratchet

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

// Модули
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod spqr;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use config::Config;
pub use crypto::handshake::UsePqRatchet;
pub use crypto::keys::{IdentityKey, IdentityKeyPair, KeyPair, PrivateKey, PublicKey};
pub use crypto::messaging::{SessionRecord, SessionState};
pub use crypto::session_builder::{KyberPreKeyBundle, PreKeyBundle, SessionBuilder};
pub use crypto::session_cipher::SessionCipher;
pub use error::{CryptoError, ProtocolError, Result};
pub use protocol::messages::{
    CiphertextMessage, CiphertextMessageType, PreKeySignalMessage, SignalMessage,
};
pub use storage::{InMemoryProtocolStore, ProtocolAddress, ProtocolStore};
