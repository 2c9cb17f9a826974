//! Wire-уровень: бинарный кодек, сообщения ratchet и хранимые структуры

pub mod codec;
pub mod messages;
pub mod structures;

pub use codec::{DecodeError, ProtoMessage};
pub use messages::{
    CiphertextMessage, CiphertextMessageType, KyberPayload, PreKeySignalMessage, SignalMessage,
    CIPHERTEXT_MESSAGE_CURRENT_VERSION, CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION,
};
