//! Бинарный wire-кодек (protobuf-совместимый)
//!
//! Минимальная ручная реализация protobuf wire format, используемая для
//! SessionStructure, prekey records и сообщений ratchet.
//!
//! ```text
//! tag        = (field_number << 3) | wire_type
//! wire_type 0 = varint (little-endian base-128, до 64 бит)
//! wire_type 1 = fixed64 (8 байт little-endian, timestamp в мс)
//! wire_type 2 = length-delimited (вложенные сообщения, ключи, ciphertext)
//! wire_type 5 = fixed32 (читается и игнорируется)
//! ```
//!
//! Неизвестные поля пропускаются (forward compatibility). Группы (3, 4)
//! и зарезервированные типы (6, 7) являются ошибкой декодирования.

use thiserror::Error;

pub const WIRE_TYPE_VARINT: u8 = 0;
pub const WIRE_TYPE_FIXED64: u8 = 1;
pub const WIRE_TYPE_LENGTH_DELIMITED: u8 = 2;
pub const WIRE_TYPE_FIXED32: u8 = 5;

/// Максимальная длина varint для u64
const MAX_VARINT_LEN: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer truncated")]
    Truncated,
    #[error("varint exceeds 64 bits")]
    VarintOverflow,
    #[error("varint is not minimally encoded")]
    NonCanonicalVarint,
    #[error("unsupported wire type {wire_type} for field {field}")]
    InvalidWireType { field: u32, wire_type: u8 },
    #[error("field number 0 is invalid")]
    InvalidFieldNumber,
    #[error("value of field {0} is out of range")]
    ValueOutOfRange(u32),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: u32, reason: &'static str },
    #[error("missing required field {0}")]
    MissingField(&'static str),
}

/// Записать varint в буфер
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Прочитать varint из начала буфера.
///
/// Возвращает значение и количество прочитанных байт. Принимается только
/// минимальная кодировка, так что decode -> encode даёт те же байты.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(DecodeError::VarintOverflow);
        }
        let bits = (byte & 0x7f) as u64;
        // 10-й байт может нести только один значащий бит
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(DecodeError::VarintOverflow);
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && byte == 0 {
                return Err(DecodeError::NonCanonicalVarint);
            }
            return Ok((value, i + 1));
        }
    }
    Err(DecodeError::Truncated)
}

/// Декодированное значение одного поля
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

impl<'a> FieldValue<'a> {
    pub fn as_u64(&self, field: u32) -> Result<u64, DecodeError> {
        match *self {
            FieldValue::Varint(v) => Ok(v),
            _ => Err(DecodeError::InvalidField { field, reason: "expected varint" }),
        }
    }

    pub fn as_u32(&self, field: u32) -> Result<u32, DecodeError> {
        u32::try_from(self.as_u64(field)?).map_err(|_| DecodeError::ValueOutOfRange(field))
    }

    pub fn as_bool(&self, field: u32) -> Result<bool, DecodeError> {
        Ok(self.as_u64(field)? != 0)
    }

    pub fn as_fixed64(&self, field: u32) -> Result<u64, DecodeError> {
        match *self {
            FieldValue::Fixed64(v) => Ok(v),
            _ => Err(DecodeError::InvalidField { field, reason: "expected fixed64" }),
        }
    }

    pub fn as_bytes(&self, field: u32) -> Result<&'a [u8], DecodeError> {
        match *self {
            FieldValue::Bytes(b) => Ok(b),
            _ => Err(DecodeError::InvalidField { field, reason: "expected length-delimited" }),
        }
    }
}

/// Запись, кодируемая в protobuf wire format
pub trait ProtoMessage: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

/// Builder для protobuf-сообщения
///
/// Скалярные поля со значением по умолчанию не пишутся (семантика proto3);
/// `optional_*` пишут значение, если оно присутствует, даже нулевое.
#[derive(Debug, Default)]
pub struct ProtoWriter {
    buf: Vec<u8>,
}

impl ProtoWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn tag(&mut self, field: u32, wire_type: u8) {
        encode_varint(((field as u64) << 3) | wire_type as u64, &mut self.buf);
    }

    pub fn uint64(&mut self, field: u32, value: u64) -> &mut Self {
        if value != 0 {
            self.tag(field, WIRE_TYPE_VARINT);
            encode_varint(value, &mut self.buf);
        }
        self
    }

    pub fn uint32(&mut self, field: u32, value: u32) -> &mut Self {
        self.uint64(field, value as u64)
    }

    pub fn optional_uint32(&mut self, field: u32, value: Option<u32>) -> &mut Self {
        if let Some(value) = value {
            self.tag(field, WIRE_TYPE_VARINT);
            encode_varint(value as u64, &mut self.buf);
        }
        self
    }

    pub fn bool(&mut self, field: u32, value: bool) -> &mut Self {
        self.uint64(field, value as u64)
    }

    pub fn fixed64(&mut self, field: u32, value: u64) -> &mut Self {
        if value != 0 {
            self.tag(field, WIRE_TYPE_FIXED64);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        if !value.is_empty() {
            self.length_delimited(field, value);
        }
        self
    }

    pub fn optional_bytes(&mut self, field: u32, value: Option<&[u8]>) -> &mut Self {
        if let Some(value) = value {
            self.length_delimited(field, value);
        }
        self
    }

    /// Вложенное сообщение пишется всегда, даже пустое: важно присутствие
    pub fn message(&mut self, field: u32, encoded: &[u8]) -> &mut Self {
        self.length_delimited(field, encoded);
        self
    }

    fn length_delimited(&mut self, field: u32, value: &[u8]) {
        self.tag(field, WIRE_TYPE_LENGTH_DELIMITED);
        encode_varint(value.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(value);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Итератор по полям protobuf-сообщения
pub struct ProtoReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> ProtoReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, failed: false }
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let (value, consumed) = decode_varint(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn next_field(&mut self) -> Result<(u32, FieldValue<'a>), DecodeError> {
        let key = self.varint()?;
        let field = u32::try_from(key >> 3).map_err(|_| DecodeError::InvalidFieldNumber)?;
        if field == 0 {
            return Err(DecodeError::InvalidFieldNumber);
        }
        let wire_type = (key & 0x7) as u8;

        let value = match wire_type {
            WIRE_TYPE_VARINT => FieldValue::Varint(self.varint()?),
            WIRE_TYPE_FIXED64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                FieldValue::Fixed64(u64::from_le_bytes(raw))
            }
            WIRE_TYPE_LENGTH_DELIMITED => {
                let len = usize::try_from(self.varint()?).map_err(|_| DecodeError::Truncated)?;
                FieldValue::Bytes(self.take(len)?)
            }
            WIRE_TYPE_FIXED32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(self.take(4)?);
                FieldValue::Fixed32(u32::from_le_bytes(raw))
            }
            other => return Err(DecodeError::InvalidWireType { field, wire_type: other }),
        };
        Ok((field, value))
    }
}

impl<'a> Iterator for ProtoReader<'a> {
    type Item = Result<(u32, FieldValue<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let item = self.next_field();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries_roundtrip() {
        for value in [0u64, 127, 128, 16_384, (1 << 31) - 1, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let (decoded, consumed) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_varint_known_encodings() {
        let mut buf = Vec::new();
        encode_varint(128, &mut buf);
        assert_eq!(buf, vec![0x80, 0x01]);

        buf.clear();
        encode_varint(16_384, &mut buf);
        assert_eq!(buf, vec![0x80, 0x80, 0x01]);
    }

    #[test]
    fn test_varint_truncated_and_overflow() {
        assert_eq!(decode_varint(&[0x80]), Err(DecodeError::Truncated));
        assert_eq!(decode_varint(&[]), Err(DecodeError::Truncated));
        assert_eq!(decode_varint(&[0xff; 11]), Err(DecodeError::VarintOverflow));
        let mut too_big = vec![0xff; 9];
        too_big.push(0x02);
        assert_eq!(decode_varint(&too_big), Err(DecodeError::VarintOverflow));
    }

    #[test]
    fn test_varint_rejects_overlong_encodings() {
        // 0 и 1 с лишними нулевыми группами
        assert_eq!(decode_varint(&[0x80, 0x00]), Err(DecodeError::NonCanonicalVarint));
        assert_eq!(decode_varint(&[0x81, 0x80, 0x00]), Err(DecodeError::NonCanonicalVarint));
        assert_eq!(decode_varint(&[0x00]), Ok((0, 1)));

        let mut buf = Vec::new();
        encode_varint(300, &mut buf);
        let (value, _) = decode_varint(&buf).unwrap();
        let mut reencoded = Vec::new();
        encode_varint(value, &mut reencoded);
        assert_eq!(reencoded, buf);
    }

    #[test]
    fn test_writer_reader_fields() {
        let mut writer = ProtoWriter::new();
        writer
            .uint32(1, 300)
            .bytes(2, b"key")
            .fixed64(3, 1_700_000_000_000)
            .uint32(4, 0)
            .optional_uint32(5, Some(0));
        let bytes = writer.into_bytes();

        let fields: Vec<_> = ProtoReader::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(
            fields,
            vec![
                (1, FieldValue::Varint(300)),
                (2, FieldValue::Bytes(b"key")),
                (3, FieldValue::Fixed64(1_700_000_000_000)),
                (5, FieldValue::Varint(0)),
            ]
        );
    }

    #[test]
    fn test_reader_parses_fixed32() {
        // field 7, wire type 5
        let bytes = [0x3d, 1, 0, 0, 0, 0x08, 0x05];
        let fields: Vec<_> = ProtoReader::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(fields, vec![(7, FieldValue::Fixed32(1)), (1, FieldValue::Varint(5))]);
    }

    #[test]
    fn test_reader_rejects_groups_and_truncation() {
        // field 1, wire type 3 (start group)
        let result: Result<Vec<_>, _> = ProtoReader::new(&[0x0b]).collect();
        assert_eq!(result, Err(DecodeError::InvalidWireType { field: 1, wire_type: 3 }));

        // field 2, length 5, only 2 bytes follow
        let result: Result<Vec<_>, _> = ProtoReader::new(&[0x12, 0x05, 0x01, 0x02]).collect();
        assert_eq!(result, Err(DecodeError::Truncated));

        // field number 0
        let result: Result<Vec<_>, _> = ProtoReader::new(&[0x00, 0x01]).collect();
        assert_eq!(result, Err(DecodeError::InvalidFieldNumber));
    }
}
