//! Криптографические наборы (Crypto Suites)
//!
//! Реализации [`CryptoProvider`](crate::crypto::provider::CryptoProvider).
//!
//! ## Classic Suite
//! - **AEAD**: ChaCha20-Poly1305 (12-байтный nonce)
//! - **KDF**: HKDF-SHA256
//! - **MAC**: HMAC-SHA256
//! - **Suite ID**: 1
//!
//! ```rust
//! use construct_spqr::crypto::suites::classic::ClassicSuiteProvider;
//! use construct_spqr::crypto::provider::CryptoProvider;
//!
//! type MySuite = ClassicSuiteProvider;
//!
//! let (seed, next_chain_key) = MySuite::kdf_ck(&[0u8; 32]).unwrap();
//! assert_ne!(seed, next_chain_key);
//! ```

pub mod classic;
