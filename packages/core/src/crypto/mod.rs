//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Application                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   SessionBuilder          │  │  SessionCipher           │
//! │  - prekey bundle (Alice)  │  │  - encrypt / decrypt     │
//! │  - PreKeySignalMessage    │  │  - архивные сессии       │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   handshake (PQXDH)       │  │  messaging (ratchet)     │
//! │  - X3DH / PQXDH           │  │  - SessionState/Record   │
//! │  - ML-KEM-768 (kem)       │  │  - SPQR (crate::spqr)    │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CryptoProvider (Crypto-Agility)                │
//! │  - AEAD (ChaCha20-Poly1305)                                 │
//! │  - KDF (HKDF-SHA256), HMAC-SHA256                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! ### Core Traits
//! - [`provider`]: CryptoProvider trait для crypto-agility
//!
//! ### Implementations
//! - [`suites`]: реализации CryptoProvider
//! - [`handshake`]: X3DH / PQXDH
//! - [`messaging`]: состояние double ratchet
//! - [`kem`]: ML-KEM-768
//!
//! ### High-Level APIs
//! - [`session_builder`]: установка сессий
//! - [`session_cipher`]: шифрование сообщений
//!
//! ### Utilities
//! - [`keys`]: ключи Curve25519 и identity
//! - [`xeddsa`]: подписи XEdDSA ключами X25519

// ============================================================================
// Core Traits
// ============================================================================

/// CryptoProvider trait для crypto-agility
pub mod provider;

/// Key Agreement (X3DH, PQXDH)
pub mod handshake;

/// Double Ratchet state
pub mod messaging;

// ============================================================================
// Implementations
// ============================================================================

pub mod suites;

pub mod kem;

// ============================================================================
// High-Level APIs
// ============================================================================

pub mod session_builder;

pub mod session_cipher;

// ============================================================================
// Utilities
// ============================================================================

pub mod keys;

pub mod xeddsa;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;
pub use session_builder::{KyberPreKeyBundle, PreKeyBundle, PreKeysUsed, SessionBuilder};
pub use session_cipher::SessionCipher;
