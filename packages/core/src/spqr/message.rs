//! Wire format сообщений SPQR V1
//!
//! ```text
//! ┌─────────┬──────────────┬──────────────┬──────┬─────────────────┐
//! │ 0x01    │ epoch varint │ index varint │ type │ payload         │
//! └─────────┴──────────────┴──────────────┴──────┴─────────────────┘
//! ```
//!
//! | type | payload                        |
//! |------|--------------------------------|
//! | 0x00 | none                           |
//! | 0x01 | header ‖ mac (96)              |
//! | 0x02 | ek vector (1152)               |
//! | 0x04 | ct1 ack (1 байт, 0/1)          |
//! | 0x05 | ct1 (960)                      |
//! | 0x06 | ct2 ‖ mac (160)                |
//! | 0x8X | чанк: u16 BE индекс ‖ 32 байта |
//!
//! Пустое сообщение означает V0 и декодированию не подлежит.

use super::erasure::{Chunk, CHUNK_LENGTH};
use super::error::{Error, Result};
use crate::crypto::kem;
use crate::protocol::codec::{decode_varint, encode_varint};

pub const MESSAGE_VERSION_V1: u8 = 0x01;

pub const HDR_PAYLOAD_LENGTH: usize = kem::HEADER_LENGTH + super::authenticator::MAC_LENGTH;
pub const EK_PAYLOAD_LENGTH: usize = kem::EK_VECTOR_LENGTH;
pub const CT1_PAYLOAD_LENGTH: usize = kem::CT1_LENGTH;
pub const CT2_PAYLOAD_LENGTH: usize = kem::CT2_LENGTH + super::authenticator::MAC_LENGTH;

const TYPE_NONE: u8 = 0x00;
const TYPE_HDR: u8 = 0x01;
const TYPE_EK: u8 = 0x02;
const TYPE_EK_CT1_ACK: u8 = 0x03;
const TYPE_CT1_ACK: u8 = 0x04;
const TYPE_CT1: u8 = 0x05;
const TYPE_CT2: u8 = 0x06;
const CHUNK_FLAG: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Hdr(Vec<u8>),
    Ek(Vec<u8>),
    Ct1Ack(bool),
    Ct1(Vec<u8>),
    Ct2(Vec<u8>),
    HdrChunk(Chunk),
    EkChunk(Chunk),
    /// Чанк ek, одновременно подтверждающий получение ct1
    EkCt1AckChunk(Chunk),
    Ct1Chunk(Chunk),
    Ct2Chunk(Chunk),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub epoch: u64,
    pub index: u32,
    pub payload: Payload,
}

fn write_chunk(type_byte: u8, chunk: &Chunk, out: &mut Vec<u8>) {
    out.push(type_byte | CHUNK_FLAG);
    out.extend_from_slice(&chunk.index.to_be_bytes());
    out.extend_from_slice(&chunk.data);
}

fn read_chunk(body: &[u8]) -> Result<Chunk> {
    if body.len() != 2 + CHUNK_LENGTH {
        return Err(Error::MsgDecode("chunk has wrong length"));
    }
    let mut data = [0u8; CHUNK_LENGTH];
    data.copy_from_slice(&body[2..]);
    Ok(Chunk {
        index: u16::from_be_bytes([body[0], body[1]]),
        data,
    })
}

fn read_fixed(body: &[u8], expected: usize) -> Result<Vec<u8>> {
    if body.len() != expected {
        return Err(Error::MsgDecode("payload has wrong length"));
    }
    Ok(body.to_vec())
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.push(MESSAGE_VERSION_V1);
        encode_varint(self.epoch, &mut out);
        encode_varint(self.index as u64, &mut out);

        match &self.payload {
            Payload::None => out.push(TYPE_NONE),
            Payload::Hdr(bytes) => {
                out.push(TYPE_HDR);
                out.extend_from_slice(bytes);
            }
            Payload::Ek(bytes) => {
                out.push(TYPE_EK);
                out.extend_from_slice(bytes);
            }
            Payload::Ct1Ack(acked) => {
                out.push(TYPE_CT1_ACK);
                out.push(*acked as u8);
            }
            Payload::Ct1(bytes) => {
                out.push(TYPE_CT1);
                out.extend_from_slice(bytes);
            }
            Payload::Ct2(bytes) => {
                out.push(TYPE_CT2);
                out.extend_from_slice(bytes);
            }
            Payload::HdrChunk(chunk) => write_chunk(TYPE_HDR, chunk, &mut out),
            Payload::EkChunk(chunk) => write_chunk(TYPE_EK, chunk, &mut out),
            Payload::EkCt1AckChunk(chunk) => write_chunk(TYPE_EK_CT1_ACK, chunk, &mut out),
            Payload::Ct1Chunk(chunk) => write_chunk(TYPE_CT1, chunk, &mut out),
            Payload::Ct2Chunk(chunk) => write_chunk(TYPE_CT2, chunk, &mut out),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&version, rest) = bytes
            .split_first()
            .ok_or(Error::MsgDecode("empty message"))?;
        if version != MESSAGE_VERSION_V1 {
            return Err(Error::UnknownVersion(version));
        }

        let (epoch, used) =
            decode_varint(rest).map_err(|_| Error::MsgDecode("invalid epoch varint"))?;
        let rest = &rest[used..];
        if epoch == 0 {
            return Err(Error::EpochZero);
        }

        let (index, used) =
            decode_varint(rest).map_err(|_| Error::MsgDecode("invalid index varint"))?;
        let index = u32::try_from(index).map_err(|_| Error::MsgDecode("index out of range"))?;
        let rest = &rest[used..];

        let (&type_byte, body) = rest
            .split_first()
            .ok_or(Error::MsgDecode("missing payload type"))?;

        let payload = match type_byte {
            TYPE_NONE if body.is_empty() => Payload::None,
            TYPE_NONE => return Err(Error::MsgDecode("trailing bytes after empty payload")),
            TYPE_HDR => Payload::Hdr(read_fixed(body, HDR_PAYLOAD_LENGTH)?),
            TYPE_EK => Payload::Ek(read_fixed(body, EK_PAYLOAD_LENGTH)?),
            TYPE_CT1_ACK => match body {
                [0] => Payload::Ct1Ack(false),
                [1] => Payload::Ct1Ack(true),
                _ => return Err(Error::MsgDecode("invalid ct1 ack")),
            },
            TYPE_CT1 => Payload::Ct1(read_fixed(body, CT1_PAYLOAD_LENGTH)?),
            TYPE_CT2 => Payload::Ct2(read_fixed(body, CT2_PAYLOAD_LENGTH)?),
            t if t == TYPE_HDR | CHUNK_FLAG => Payload::HdrChunk(read_chunk(body)?),
            t if t == TYPE_EK | CHUNK_FLAG => Payload::EkChunk(read_chunk(body)?),
            t if t == TYPE_EK_CT1_ACK | CHUNK_FLAG => Payload::EkCt1AckChunk(read_chunk(body)?),
            t if t == TYPE_CT1 | CHUNK_FLAG => Payload::Ct1Chunk(read_chunk(body)?),
            t if t == TYPE_CT2 | CHUNK_FLAG => Payload::Ct2Chunk(read_chunk(body)?),
            _ => return Err(Error::MsgDecode("unknown payload type")),
        };

        Ok(Self {
            epoch,
            index,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u16) -> Chunk {
        Chunk {
            index,
            data: [index as u8; CHUNK_LENGTH],
        }
    }

    #[test]
    fn test_every_payload_reencodes_identically() {
        let payloads = vec![
            Payload::None,
            Payload::Hdr(vec![1; HDR_PAYLOAD_LENGTH]),
            Payload::Ek(vec![2; EK_PAYLOAD_LENGTH]),
            Payload::Ct1Ack(true),
            Payload::Ct1Ack(false),
            Payload::Ct1(vec![3; CT1_PAYLOAD_LENGTH]),
            Payload::Ct2(vec![4; CT2_PAYLOAD_LENGTH]),
            Payload::HdrChunk(chunk(0)),
            Payload::EkChunk(chunk(40)),
            Payload::EkCt1AckChunk(chunk(300)),
            Payload::Ct1Chunk(chunk(7)),
            Payload::Ct2Chunk(chunk(65_535)),
        ];
        for payload in payloads {
            let message = Message {
                epoch: 300,
                index: 128,
                payload,
            };
            let encoded = message.encode();
            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(decoded, message);
            assert_eq!(decoded.encode(), encoded);
        }
    }

    #[test]
    fn test_header_layout() {
        let message = Message {
            epoch: 1,
            index: 0,
            payload: Payload::None,
        };
        assert_eq!(message.encode(), vec![0x01, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_rejects_invalid_input() {
        assert_eq!(Message::decode(&[]), Err(Error::MsgDecode("empty message")));
        assert_eq!(Message::decode(&[0x02, 1, 0, 0]), Err(Error::UnknownVersion(2)));
        assert_eq!(Message::decode(&[0x01, 0, 0, 0]), Err(Error::EpochZero));
        assert!(Message::decode(&[0x01, 1, 0, 0x07]).is_err());
        assert!(Message::decode(&[0x01, 1, 0, TYPE_CT1_ACK, 2]).is_err());
        assert!(Message::decode(&[0x01, 1, 0, TYPE_HDR, 0, 0]).is_err());
        assert!(Message::decode(&[0x01, 1, 0]).is_err());
    }
}
