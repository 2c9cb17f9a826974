//! Сообщения ratchet в wire format
//!
//! ```text
//! SignalMessage
//! ┌─────────┬──────────────────────────────────────┬──────────┐
//! │ version │ protobuf body                        │ MAC (8)  │
//! │ (v<<4)|4│ 1 ratchet_key  2 counter             │ HMAC-256 │
//! │         │ 3 previous_counter  4 ciphertext     │ усечённый│
//! │         │ 5 pq_ratchet                         │          │
//! └─────────┴──────────────────────────────────────┴──────────┘
//!
//! PreKeySignalMessage
//! ┌─────────┬──────────────────────────────────────────────────┐
//! │ version │ 1 pre_key_id  2 base_key  3 identity_key         │
//! │         │ 4 message  5 registration_id  6 signed_pre_key_id│
//! │         │ 7 kyber_pre_key_id  8 kyber_ciphertext           │
//! └─────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! MAC покрывает identity отправителя, identity получателя и всё
//! сообщение до MAC включая байт версии.

use crate::crypto::keys::{constant_time_eq, IdentityKey, PublicKey};
use crate::crypto::provider::CryptoProvider;
use crate::error::{ProtocolError, Result};
use crate::protocol::codec::{DecodeError, ProtoReader, ProtoWriter};

pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 4;
pub const CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION: u8 = 3;

/// Длина усечённого HMAC
pub const MAC_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CiphertextMessageType {
    Whisper = 2,
    PreKey = 3,
}

#[derive(Debug, Clone)]
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            CiphertextMessage::SignalMessage(_) => CiphertextMessageType::Whisper,
            CiphertextMessage::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            CiphertextMessage::SignalMessage(m) => m.serialized(),
            CiphertextMessage::PreKeySignalMessage(m) => m.serialized(),
        }
    }

    /// Разобрать сообщение по типу, переданному транспортом
    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self> {
        Ok(match message_type {
            CiphertextMessageType::Whisper => {
                CiphertextMessage::SignalMessage(SignalMessage::try_from(bytes)?)
            }
            CiphertextMessageType::PreKey => {
                CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::try_from(bytes)?)
            }
        })
    }
}

fn version_byte(message_version: u8) -> u8 {
    (message_version << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION
}

fn check_version(first_byte: u8) -> Result<u8> {
    let message_version = first_byte >> 4;
    if message_version < CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION {
        return Err(ProtocolError::LegacyCiphertextVersion(message_version));
    }
    if message_version > CIPHERTEXT_MESSAGE_CURRENT_VERSION {
        return Err(ProtocolError::UnrecognizedMessageVersion(message_version));
    }
    Ok(message_version)
}

#[derive(Debug, Clone)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Box<[u8]>,
    pq_ratchet: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new<P: CryptoProvider>(
        message_version: u8,
        mac_key: &[u8],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: &[u8],
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        pq_ratchet: &[u8],
    ) -> Result<Self> {
        let mut writer = ProtoWriter::new();
        writer
            .bytes(1, sender_ratchet_key.as_bytes())
            .uint32(2, counter)
            .uint32(3, previous_counter)
            .bytes(4, ciphertext)
            .bytes(5, pq_ratchet);

        let mut serialized = vec![version_byte(message_version)];
        serialized.extend_from_slice(&writer.into_bytes());
        let mac = Self::compute_mac::<P>(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &serialized,
        )?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.into(),
            pq_ratchet: pq_ratchet.into(),
            serialized: serialized.into_boxed_slice(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Сообщение SPQR; пустое, если SPQR выключен у отправителя
    pub fn pq_ratchet(&self) -> &[u8] {
        &self.pq_ratchet
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    pub fn verify_mac<P: CryptoProvider>(
        &self,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8],
    ) -> Result<bool> {
        let (content, their_mac) = self.serialized.split_at(self.serialized.len() - MAC_LENGTH);
        let our_mac =
            Self::compute_mac::<P>(sender_identity_key, receiver_identity_key, mac_key, content)?;
        Ok(constant_time_eq(&our_mac, their_mac))
    }

    fn compute_mac<P: CryptoProvider>(
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8],
        message: &[u8],
    ) -> Result<[u8; MAC_LENGTH]> {
        let sender = sender_identity_key.serialize();
        let receiver = receiver_identity_key.serialize();
        let full = P::hmac(mac_key, &[&sender[..], &receiver[..], message])?;
        let mut mac = [0u8; MAC_LENGTH];
        mac.copy_from_slice(&full[..MAC_LENGTH]);
        Ok(mac)
    }
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        if value.len() < 1 + MAC_LENGTH {
            return Err(ProtocolError::InvalidMessage(
                "SignalMessage is too short".to_string(),
            ));
        }
        let message_version = check_version(value[0])?;

        let mut ratchet_key = None;
        let mut counter = None;
        let mut previous_counter = 0;
        let mut ciphertext = None;
        let mut pq_ratchet: &[u8] = &[];
        for field in ProtoReader::new(&value[1..value.len() - MAC_LENGTH]) {
            let (number, field) = field?;
            match number {
                1 => ratchet_key = Some(field.as_bytes(1)?),
                2 => counter = Some(field.as_u32(2)?),
                3 => previous_counter = field.as_u32(3)?,
                4 => ciphertext = Some(field.as_bytes(4)?),
                5 => pq_ratchet = field.as_bytes(5)?,
                _ => {}
            }
        }

        let ratchet_key = ratchet_key.ok_or(DecodeError::MissingField("ratchet_key"))?;
        let ciphertext = ciphertext.ok_or(DecodeError::MissingField("ciphertext"))?;

        Ok(Self {
            message_version,
            sender_ratchet_key: PublicKey::deserialize(ratchet_key)?,
            // counter 0 не пишется в proto3
            counter: counter.unwrap_or(0),
            previous_counter,
            ciphertext: ciphertext.into(),
            pq_ratchet: pq_ratchet.into(),
            serialized: value.into(),
        })
    }
}

/// Payload Kyber prekey в первом сообщении PQXDH сессии
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KyberPayload {
    pub pre_key_id: u32,
    pub ciphertext: Box<[u8]>,
}

#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    kyber_payload: Option<KyberPayload>,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Box<[u8]>,
}

impl PreKeySignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        kyber_payload: Option<KyberPayload>,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Result<Self> {
        let mut writer = ProtoWriter::new();
        writer
            .optional_uint32(1, pre_key_id)
            .bytes(2, base_key.as_bytes())
            .bytes(3, &identity_key.serialize())
            .bytes(4, message.serialized())
            .uint32(5, registration_id)
            .uint32(6, signed_pre_key_id);
        if let Some(kyber) = &kyber_payload {
            writer
                .optional_uint32(7, Some(kyber.pre_key_id))
                .bytes(8, &kyber.ciphertext);
        }

        let mut serialized = vec![version_byte(message_version)];
        serialized.extend_from_slice(&writer.into_bytes());

        Ok(Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            kyber_payload,
            base_key,
            identity_key,
            message,
            serialized: serialized.into_boxed_slice(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn kyber_pre_key_id(&self) -> Option<u32> {
        self.kyber_payload.as_ref().map(|k| k.pre_key_id)
    }

    pub fn kyber_ciphertext(&self) -> Option<&[u8]> {
        self.kyber_payload.as_ref().map(|k| &*k.ciphertext)
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let first = *value.first().ok_or_else(|| {
            ProtocolError::InvalidMessage("PreKeySignalMessage is empty".to_string())
        })?;
        let message_version = check_version(first)?;

        let mut pre_key_id = None;
        let mut base_key = None;
        let mut identity_key = None;
        let mut message = None;
        let mut registration_id = 0;
        let mut signed_pre_key_id = None;
        let mut kyber_pre_key_id = None;
        let mut kyber_ciphertext = None;
        for field in ProtoReader::new(&value[1..]) {
            let (number, field) = field?;
            match number {
                1 => pre_key_id = Some(field.as_u32(1)?),
                2 => base_key = Some(field.as_bytes(2)?),
                3 => identity_key = Some(field.as_bytes(3)?),
                4 => message = Some(field.as_bytes(4)?),
                5 => registration_id = field.as_u32(5)?,
                6 => signed_pre_key_id = Some(field.as_u32(6)?),
                7 => kyber_pre_key_id = Some(field.as_u32(7)?),
                8 => kyber_ciphertext = Some(field.as_bytes(8)?),
                _ => {}
            }
        }

        let base_key = base_key.ok_or(DecodeError::MissingField("base_key"))?;
        let identity_key = identity_key.ok_or(DecodeError::MissingField("identity_key"))?;
        let message = message.ok_or(DecodeError::MissingField("message"))?;
        // id 0 допустим и тогда поле не пишется
        let signed_pre_key_id = signed_pre_key_id.unwrap_or(0);

        let kyber_payload = match (kyber_pre_key_id, kyber_ciphertext) {
            (Some(pre_key_id), Some(ciphertext)) => Some(KyberPayload {
                pre_key_id,
                ciphertext: ciphertext.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(ProtocolError::InvalidMessage(
                    "Kyber prekey id and ciphertext must be present together".to_string(),
                ))
            }
        };
        match (message_version, &kyber_payload) {
            (CIPHERTEXT_MESSAGE_CURRENT_VERSION, None) => {
                return Err(ProtocolError::InvalidMessage(
                    "version 4 prekey message without Kyber payload".to_string(),
                ))
            }
            (CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION, Some(_)) => {
                return Err(ProtocolError::InvalidMessage(
                    "version 3 prekey message with Kyber payload".to_string(),
                ))
            }
            _ => {}
        }

        let message = SignalMessage::try_from(message)?;
        if message.message_version() != message_version {
            return Err(ProtocolError::InvalidMessage(
                "embedded message version mismatch".to_string(),
            ));
        }

        Ok(Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            kyber_payload,
            base_key: PublicKey::deserialize(base_key)?,
            identity_key: IdentityKey::decode(identity_key)?,
            message,
            serialized: value.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{IdentityKeyPair, KeyPair};
    use crate::crypto::suites::classic::ClassicSuiteProvider;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type Suite = ClassicSuiteProvider;

    fn signal_message(
        rng: &mut StdRng,
        version: u8,
        sender: &IdentityKeyPair,
        receiver: &IdentityKeyPair,
    ) -> SignalMessage {
        let ratchet_key = KeyPair::generate(rng).public_key;
        SignalMessage::new::<Suite>(
            version,
            &[7u8; 32],
            ratchet_key,
            42,
            41,
            b"ciphertext bytes",
            sender.identity_key(),
            receiver.identity_key(),
            &[0x01, 0x02, 0x03],
        )
        .unwrap()
    }

    #[test]
    fn test_signal_message_parse_and_mac() {
        let mut rng = StdRng::seed_from_u64(10);
        let alice = IdentityKeyPair::generate(&mut rng);
        let bob = IdentityKeyPair::generate(&mut rng);
        let message = signal_message(&mut rng, 4, &alice, &bob);

        assert_eq!(message.serialized()[0], 0x44);
        let parsed = SignalMessage::try_from(message.serialized()).unwrap();
        assert_eq!(parsed.counter(), 42);
        assert_eq!(parsed.previous_counter(), 41);
        assert_eq!(parsed.body(), b"ciphertext bytes");
        assert_eq!(parsed.pq_ratchet(), &[0x01, 0x02, 0x03]);
        assert_eq!(parsed.sender_ratchet_key(), message.sender_ratchet_key());

        assert!(parsed
            .verify_mac::<Suite>(alice.identity_key(), bob.identity_key(), &[7u8; 32])
            .unwrap());
        // identity переставлены
        assert!(!parsed
            .verify_mac::<Suite>(bob.identity_key(), alice.identity_key(), &[7u8; 32])
            .unwrap());
        assert!(!parsed
            .verify_mac::<Suite>(alice.identity_key(), bob.identity_key(), &[8u8; 32])
            .unwrap());
    }

    #[test]
    fn test_signal_message_tampering_breaks_mac() {
        let mut rng = StdRng::seed_from_u64(11);
        let alice = IdentityKeyPair::generate(&mut rng);
        let bob = IdentityKeyPair::generate(&mut rng);
        let message = signal_message(&mut rng, 4, &alice, &bob);

        let mut bytes = message.serialized().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let parsed = SignalMessage::try_from(bytes.as_slice()).unwrap();
        assert!(!parsed
            .verify_mac::<Suite>(alice.identity_key(), bob.identity_key(), &[7u8; 32])
            .unwrap());
    }

    #[test]
    fn test_version_checks() {
        let mut rng = StdRng::seed_from_u64(12);
        let alice = IdentityKeyPair::generate(&mut rng);
        let bob = IdentityKeyPair::generate(&mut rng);
        let mut bytes = signal_message(&mut rng, 4, &alice, &bob).serialized().to_vec();

        bytes[0] = 0x24;
        assert!(matches!(
            SignalMessage::try_from(bytes.as_slice()),
            Err(ProtocolError::LegacyCiphertextVersion(2))
        ));
        bytes[0] = 0x54;
        assert!(matches!(
            SignalMessage::try_from(bytes.as_slice()),
            Err(ProtocolError::UnrecognizedMessageVersion(5))
        ));
        assert!(matches!(
            SignalMessage::try_from(&[0x44u8, 0, 0][..]),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_prekey_message_kyber_fields() {
        let mut rng = StdRng::seed_from_u64(13);
        let alice = IdentityKeyPair::generate(&mut rng);
        let bob = IdentityKeyPair::generate(&mut rng);
        let base_key = KeyPair::generate(&mut rng).public_key;

        let v4 = PreKeySignalMessage::new(
            4,
            1234,
            Some(0),
            7,
            Some(KyberPayload {
                pre_key_id: 9,
                ciphertext: vec![0xab; 1088].into(),
            }),
            base_key,
            *alice.identity_key(),
            signal_message(&mut rng, 4, &alice, &bob),
        )
        .unwrap();
        let parsed = PreKeySignalMessage::try_from(v4.serialized()).unwrap();
        assert_eq!(parsed.registration_id(), 1234);
        assert_eq!(parsed.pre_key_id(), Some(0));
        assert_eq!(parsed.signed_pre_key_id(), 7);
        assert_eq!(parsed.kyber_pre_key_id(), Some(9));
        assert_eq!(parsed.kyber_ciphertext().map(<[u8]>::len), Some(1088));
        assert_eq!(parsed.base_key(), &base_key);
        assert_eq!(parsed.message().counter(), 42);

        // v4 без Kyber отвергается
        let stripped = PreKeySignalMessage::new(
            4,
            1234,
            None,
            7,
            None,
            base_key,
            *alice.identity_key(),
            signal_message(&mut rng, 4, &alice, &bob),
        )
        .unwrap();
        assert!(matches!(
            PreKeySignalMessage::try_from(stripped.serialized()),
            Err(ProtocolError::InvalidMessage(_))
        ));

        // v3 без Kyber принимается
        let v3 = PreKeySignalMessage::new(
            3,
            1,
            None,
            7,
            None,
            base_key,
            *alice.identity_key(),
            signal_message(&mut rng, 3, &alice, &bob),
        )
        .unwrap();
        let parsed = PreKeySignalMessage::try_from(v3.serialized()).unwrap();
        assert_eq!(parsed.message_version(), 3);
        assert_eq!(parsed.pre_key_id(), None);
    }

    #[test]
    fn test_ciphertext_message_dispatch() {
        let mut rng = StdRng::seed_from_u64(14);
        let alice = IdentityKeyPair::generate(&mut rng);
        let bob = IdentityKeyPair::generate(&mut rng);
        let message = CiphertextMessage::SignalMessage(signal_message(&mut rng, 4, &alice, &bob));
        assert_eq!(message.message_type(), CiphertextMessageType::Whisper);

        let parsed =
            CiphertextMessage::deserialize(message.message_type(), message.serialize()).unwrap();
        assert_eq!(parsed.serialize(), message.serialize());
    }
}
