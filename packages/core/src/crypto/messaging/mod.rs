//! Состояние ratchet сессий
//!
//! ## Компоненты
//! - [`ratchet_keys`]: RootKey, ChainKey, MessageKeys
//! - [`session_state`]: одна сессия с конкретным собеседником
//! - [`session_record`]: текущая сессия и архив предыдущих
//!
//! ## Dataflow
//! ```text
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! PQXDH → SessionState                       PQXDH → SessionState
//!   receiver chain (SPK_B, ck)                 sender chain (SPK_B, ck)
//!   sender chain   (новый ключ)
//!   pending prekey
//!
//! encrypt ── PreKeySignalMessage ──────────▶ decrypt
//!                                              receiver chain (ключ Alice)
//!                                              sender chain   (новый ключ)
//! decrypt ◀─────────── SignalMessage ─────── encrypt
//!   pending prekey очищен
//! ```
//!
//! ## Security Properties
//!
//! ### Forward Secrecy
//! Ключи цепочек только продвигаются вперёд; использованный ключ сообщения
//! удаляется из состояния.
//!
//! ### Break-in Recovery
//! Каждый ответ собеседника приносит новый ratchet ключ и новый DH шаг.
//!
//! ### Out-of-Order Messages
//! Пропущенные ключи хранятся как seed, не больше MAX_MESSAGE_KEYS на
//! цепочку и не дальше MAX_FORWARD_JUMPS вперёд.

pub mod ratchet_keys;
pub mod session_record;
pub mod session_state;

pub use ratchet_keys::{ChainKey, MessageKeyGenerator, MessageKeys, RootKey};
pub use session_record::SessionRecord;
pub use session_state::{
    SessionState, SessionUsabilityRequirements, UnacknowledgedPreKeyMessageItems,
};
