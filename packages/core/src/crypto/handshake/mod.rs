//! Key Agreement
//!
//! Установка общего root key и первой цепочки между двумя сторонами без
//! предварительного обмена секретами.
//!
//! ## Протоколы
//! - **X3DH**: три или четыре DH, версия сессии 3
//! - **PQXDH**: X3DH + ML-KEM-768 Kyber prekey, версия сессии 4, SPQR
//!
//! ## Не отвечает за:
//! - Проверку подписей prekey bundle и доверие identity (это делает
//!   [`SessionBuilder`](crate::crypto::session_builder::SessionBuilder))
//! - Шифрование сообщений (это делает
//!   [`SessionCipher`](crate::crypto::session_cipher::SessionCipher))

pub mod pqxdh;

pub use pqxdh::{
    initialize_alice_session, initialize_bob_session, AliceParameters, AliceSession,
    BobParameters, UsePqRatchet,
};
