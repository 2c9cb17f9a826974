//! Хранимые структуры сессий и prekeys
//!
//! Простые записи данных с явной семантикой присутствия полей. Кодирование
//! и декодирование являются чистыми функциями и не знают о логике ratchet.
//!
//! ```text
//! RecordStructure
//! ├── 1  current_session    SessionStructure
//! └── 2  previous_sessions  repeated SessionStructure
//!
//! SessionStructure
//! ├── 1  session_version          ├── 9  pending_pre_key
//! ├── 2  local_identity_public    ├── 10 remote_registration_id
//! ├── 3  remote_identity_public   ├── 11 local_registration_id
//! ├── 4  root_key                 ├── 12 needs_refresh
//! ├── 5  previous_counter         ├── 13 alice_base_key
//! ├── 6  sender_chain             └── 15 pq_ratchet_state
//! └── 7  receiver_chains
//! ```

use super::codec::{DecodeError, ProtoMessage, ProtoReader, ProtoWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainKeyStructure {
    pub index: u32,
    pub key: Vec<u8>,
}

/// Пропущенный ключ сообщения хранится как seed цепочки
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageKeyStructure {
    pub index: u32,
    pub seed: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStructure {
    pub sender_ratchet_key: Vec<u8>,
    pub sender_ratchet_key_private: Vec<u8>,
    pub chain_key: Option<ChainKeyStructure>,
    pub message_keys: Vec<MessageKeyStructure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingPreKeyStructure {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: Vec<u8>,
    /// Миллисекунды Unix epoch
    pub timestamp: u64,
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStructure {
    pub session_version: u32,
    pub local_identity_public: Vec<u8>,
    pub remote_identity_public: Vec<u8>,
    pub root_key: Vec<u8>,
    pub previous_counter: u32,
    pub sender_chain: Option<ChainStructure>,
    pub receiver_chains: Vec<ChainStructure>,
    pub pending_pre_key: Option<PendingPreKeyStructure>,
    pub remote_registration_id: u32,
    pub local_registration_id: u32,
    pub needs_refresh: bool,
    pub alice_base_key: Vec<u8>,
    pub pq_ratchet_state: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStructure {
    pub current_session: Option<SessionStructure>,
    pub previous_sessions: Vec<SessionStructure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreKeyRecordStructure {
    pub id: u32,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Общая форма signed и Kyber prekey записей
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedPreKeyRecordStructure {
    pub id: u32,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub timestamp: u64,
}

pub type KyberPreKeyRecordStructure = SignedPreKeyRecordStructure;

impl ProtoMessage for ChainKeyStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer.uint32(1, self.index).bytes(2, &self.key);
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.index = value.as_u32(1)?,
                2 => out.key = value.as_bytes(2)?.to_vec(),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for MessageKeyStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer.uint32(1, self.index).bytes(5, &self.seed);
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.index = value.as_u32(1)?,
                5 => out.seed = value.as_bytes(5)?.to_vec(),
                // 2-4: производные ключи старого формата
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for ChainStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer
            .bytes(1, &self.sender_ratchet_key)
            .bytes(2, &self.sender_ratchet_key_private);
        if let Some(chain_key) = &self.chain_key {
            writer.message(3, &chain_key.encode());
        }
        for message_key in &self.message_keys {
            writer.message(4, &message_key.encode());
        }
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.sender_ratchet_key = value.as_bytes(1)?.to_vec(),
                2 => out.sender_ratchet_key_private = value.as_bytes(2)?.to_vec(),
                3 => out.chain_key = Some(ChainKeyStructure::decode(value.as_bytes(3)?)?),
                4 => out
                    .message_keys
                    .push(MessageKeyStructure::decode(value.as_bytes(4)?)?),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for PendingPreKeyStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer
            .optional_uint32(1, self.pre_key_id)
            .bytes(2, &self.base_key)
            .uint32(3, self.signed_pre_key_id)
            .fixed64(4, self.timestamp)
            .optional_uint32(5, self.kyber_pre_key_id)
            .optional_bytes(6, self.kyber_ciphertext.as_deref());
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.pre_key_id = Some(value.as_u32(1)?),
                2 => out.base_key = value.as_bytes(2)?.to_vec(),
                3 => out.signed_pre_key_id = value.as_u32(3)?,
                4 => out.timestamp = value.as_fixed64(4)?,
                5 => out.kyber_pre_key_id = Some(value.as_u32(5)?),
                6 => out.kyber_ciphertext = Some(value.as_bytes(6)?.to_vec()),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for SessionStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer
            .uint32(1, self.session_version)
            .bytes(2, &self.local_identity_public)
            .bytes(3, &self.remote_identity_public)
            .bytes(4, &self.root_key)
            .uint32(5, self.previous_counter);
        if let Some(sender_chain) = &self.sender_chain {
            writer.message(6, &sender_chain.encode());
        }
        for chain in &self.receiver_chains {
            writer.message(7, &chain.encode());
        }
        if let Some(pending) = &self.pending_pre_key {
            writer.message(9, &pending.encode());
        }
        writer
            .uint32(10, self.remote_registration_id)
            .uint32(11, self.local_registration_id)
            .bool(12, self.needs_refresh)
            .bytes(13, &self.alice_base_key)
            .bytes(15, &self.pq_ratchet_state);
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.session_version = value.as_u32(1)?,
                2 => out.local_identity_public = value.as_bytes(2)?.to_vec(),
                3 => out.remote_identity_public = value.as_bytes(3)?.to_vec(),
                4 => out.root_key = value.as_bytes(4)?.to_vec(),
                5 => out.previous_counter = value.as_u32(5)?,
                6 => out.sender_chain = Some(ChainStructure::decode(value.as_bytes(6)?)?),
                7 => out
                    .receiver_chains
                    .push(ChainStructure::decode(value.as_bytes(7)?)?),
                9 => {
                    out.pending_pre_key =
                        Some(PendingPreKeyStructure::decode(value.as_bytes(9)?)?)
                }
                10 => out.remote_registration_id = value.as_u32(10)?,
                11 => out.local_registration_id = value.as_u32(11)?,
                12 => out.needs_refresh = value.as_bool(12)?,
                13 => out.alice_base_key = value.as_bytes(13)?.to_vec(),
                15 => out.pq_ratchet_state = value.as_bytes(15)?.to_vec(),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for RecordStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        if let Some(current) = &self.current_session {
            writer.message(1, &current.encode());
        }
        for previous in &self.previous_sessions {
            writer.message(2, &previous.encode());
        }
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.current_session = Some(SessionStructure::decode(value.as_bytes(1)?)?),
                2 => out
                    .previous_sessions
                    .push(SessionStructure::decode(value.as_bytes(2)?)?),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for PreKeyRecordStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer
            .uint32(1, self.id)
            .bytes(2, &self.public_key)
            .bytes(3, &self.private_key);
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.id = value.as_u32(1)?,
                2 => out.public_key = value.as_bytes(2)?.to_vec(),
                3 => out.private_key = value.as_bytes(3)?.to_vec(),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl ProtoMessage for SignedPreKeyRecordStructure {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer
            .uint32(1, self.id)
            .bytes(2, &self.public_key)
            .bytes(3, &self.private_key)
            .bytes(4, &self.signature)
            .fixed64(5, self.timestamp);
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in ProtoReader::new(bytes) {
            let (number, value) = field?;
            match number {
                1 => out.id = value.as_u32(1)?,
                2 => out.public_key = value.as_bytes(2)?.to_vec(),
                3 => out.private_key = value.as_bytes(3)?.to_vec(),
                4 => out.signature = value.as_bytes(4)?.to_vec(),
                5 => out.timestamp = value.as_fixed64(5)?,
                _ => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(tag: u8) -> ChainStructure {
        ChainStructure {
            sender_ratchet_key: vec![tag; 32],
            sender_ratchet_key_private: vec![],
            chain_key: Some(ChainKeyStructure {
                index: tag as u32,
                key: vec![tag ^ 0xff; 32],
            }),
            message_keys: vec![
                MessageKeyStructure {
                    index: 9,
                    seed: vec![1; 32],
                },
                MessageKeyStructure {
                    index: 3,
                    seed: vec![2; 32],
                },
            ],
        }
    }

    fn session() -> SessionStructure {
        SessionStructure {
            session_version: 4,
            local_identity_public: vec![1; 32],
            remote_identity_public: vec![2; 32],
            root_key: vec![3; 32],
            previous_counter: 17,
            sender_chain: Some(chain(1)),
            receiver_chains: vec![chain(2), chain(3)],
            pending_pre_key: Some(PendingPreKeyStructure {
                pre_key_id: Some(0),
                signed_pre_key_id: 5,
                base_key: vec![4; 32],
                timestamp: 1_700_000_000_000,
                kyber_pre_key_id: Some(8),
                kyber_ciphertext: Some(vec![5; 1088]),
            }),
            remote_registration_id: 1234,
            local_registration_id: 5678,
            needs_refresh: true,
            alice_base_key: vec![6; 32],
            pq_ratchet_state: vec![7; 200],
        }
    }

    #[test]
    fn test_session_structure_is_lossless() {
        let original = session();
        let decoded = SessionStructure::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
        // порядок повторяющихся полей сохраняется
        assert_eq!(decoded.receiver_chains[1].sender_ratchet_key, vec![3; 32]);
        assert_eq!(decoded.sender_chain.unwrap().message_keys[0].index, 9);
    }

    #[test]
    fn test_optional_zero_values_survive() {
        let pending = PendingPreKeyStructure {
            pre_key_id: Some(0),
            kyber_pre_key_id: None,
            ..Default::default()
        };
        let decoded = PendingPreKeyStructure::decode(&pending.encode()).unwrap();
        assert_eq!(decoded.pre_key_id, Some(0));
        assert_eq!(decoded.kyber_pre_key_id, None);
        assert_eq!(decoded.kyber_ciphertext, None);
    }

    #[test]
    fn test_record_with_archive() {
        let record = RecordStructure {
            current_session: Some(session()),
            previous_sessions: vec![SessionStructure::default(), session()],
        };
        assert_eq!(RecordStructure::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut bytes = PreKeyRecordStructure {
            id: 3,
            public_key: vec![1; 32],
            private_key: vec![2; 32],
        }
        .encode();
        // field 20 (varint) и field 21 (fixed32)
        bytes.extend_from_slice(&[0xa0, 0x01, 0x05, 0xad, 0x01, 0, 0, 0, 0]);
        let decoded = PreKeyRecordStructure::decode(&bytes).unwrap();
        assert_eq!(decoded.id, 3);
    }

    #[test]
    fn test_wrong_wire_type_is_error() {
        // field 1 закодировано как bytes
        let bytes = [0x0a, 0x01, 0x00];
        assert!(matches!(
            SessionStructure::decode(&bytes),
            Err(DecodeError::InvalidField { field: 1, .. })
        ));
    }

    #[test]
    fn test_signed_prekey_timestamp_is_fixed64() {
        let record = SignedPreKeyRecordStructure {
            id: 1,
            timestamp: 0x0102030405060708,
            ..Default::default()
        };
        let bytes = record.encode();
        // tag (5 << 3) | 1 = 0x29, затем 8 байт little-endian
        let pos = bytes.iter().position(|&b| b == 0x29).unwrap();
        assert_eq!(&bytes[pos + 1..pos + 9], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(SignedPreKeyRecordStructure::decode(&bytes).unwrap(), record);
    }
}
