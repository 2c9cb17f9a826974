//! Систематический erasure code над GF(2^16)
//!
//! Полезная нагрузка делится на чанки по 32 байта (16 символов GF(2^16)).
//! Чанки с индексами `0..n` совпадают с исходными данными, чанк с индексом
//! `i >= n` является значением интерполяционного многочлена Лагранжа в
//! точке `i` (отдельно для каждой из 16 позиций символа). Любые `n`
//! различных чанков восстанавливают исходные данные.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

pub const CHUNK_LENGTH: usize = 32;
const SYMBOLS_PER_CHUNK: usize = CHUNK_LENGTH / 2;

/// x^16 + x^12 + x^3 + x + 1 (примитивный)
const FIELD_POLYNOMIAL: u32 = 0x1100b;

fn gf_mul(a: u16, b: u16) -> u16 {
    let mut a = a as u32;
    let mut b = b;
    let mut product: u32 = 0;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        b >>= 1;
        a <<= 1;
        if a & 0x1_0000 != 0 {
            a ^= FIELD_POLYNOMIAL;
        }
    }
    product as u16
}

/// a^(2^16 - 2) = a^{-1} для a != 0
fn gf_inv(a: u16) -> u16 {
    let mut result = 1u16;
    let mut base = a;
    let mut exp: u32 = 0xfffe;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Веса Лагранжа для вычисления в точке `x` по узлам `points`
fn lagrange_weights(points: &[u16], x: u16) -> Vec<u16> {
    points
        .iter()
        .enumerate()
        .map(|(j, &xj)| {
            let mut numerator = 1u16;
            let mut denominator = 1u16;
            for (m, &xm) in points.iter().enumerate() {
                if m != j {
                    numerator = gf_mul(numerator, x ^ xm);
                    denominator = gf_mul(denominator, xj ^ xm);
                }
            }
            gf_mul(numerator, gf_inv(denominator))
        })
        .collect()
}

fn symbol(chunk: &[u8; CHUNK_LENGTH], position: usize) -> u16 {
    u16::from_be_bytes([chunk[2 * position], chunk[2 * position + 1]])
}

/// Интерполировать значение в точке `x` по набору (узел, чанк)
fn interpolate(points: &[u16], chunks: &[&[u8; CHUNK_LENGTH]], x: u16) -> [u8; CHUNK_LENGTH] {
    let weights = lagrange_weights(points, x);
    let mut out = [0u8; CHUNK_LENGTH];
    for position in 0..SYMBOLS_PER_CHUNK {
        let mut acc = 0u16;
        for (weight, chunk) in weights.iter().zip(chunks) {
            acc ^= gf_mul(*weight, symbol(chunk, position));
        }
        out[2 * position..2 * position + 2].copy_from_slice(&acc.to_be_bytes());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u16,
    pub data: [u8; CHUNK_LENGTH],
}

fn chunk_count(length: usize) -> Result<usize> {
    if length == 0 || length % CHUNK_LENGTH != 0 || length / CHUNK_LENGTH > u16::MAX as usize {
        return Err(Error::MsgDecode("payload length is not a whole number of chunks"));
    }
    Ok(length / CHUNK_LENGTH)
}

/// Поток чанков для одной полезной нагрузки
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    data: Vec<[u8; CHUNK_LENGTH]>,
    next_index: u16,
}

impl Encoder {
    pub fn new(payload: &[u8]) -> Result<Self> {
        chunk_count(payload.len())?;
        let data = payload
            .chunks_exact(CHUNK_LENGTH)
            .map(|chunk| {
                let mut block = [0u8; CHUNK_LENGTH];
                block.copy_from_slice(chunk);
                block
            })
            .collect();
        Ok(Self {
            data,
            next_index: 0,
        })
    }

    pub fn chunk_at(&self, index: u16) -> Chunk {
        let n = self.data.len();
        let data = match self.data.get(index as usize) {
            Some(block) => *block,
            None => {
                let points: Vec<u16> = (0..n as u16).collect();
                let blocks: Vec<&[u8; CHUNK_LENGTH]> = self.data.iter().collect();
                interpolate(&points, &blocks, index)
            }
        };
        Chunk { index, data }
    }

    pub fn next_chunk(&mut self) -> Chunk {
        let chunk = self.chunk_at(self.next_index);
        self.next_index = self.next_index.wrapping_add(1);
        chunk
    }
}

/// Сборка полезной нагрузки известной длины из любых `n` чанков
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decoder {
    needed: usize,
    received: BTreeMap<u16, [u8; CHUNK_LENGTH]>,
}

impl Decoder {
    pub fn new(length: usize) -> Result<Self> {
        Ok(Self {
            needed: chunk_count(length)?,
            received: BTreeMap::new(),
        })
    }

    pub fn add_chunk(&mut self, chunk: &Chunk) {
        if self.received.len() < self.needed {
            self.received.entry(chunk.index).or_insert(chunk.data);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() >= self.needed
    }

    pub fn decoded_message(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let points: Vec<u16> = self.received.keys().copied().collect();
        let blocks: Vec<&[u8; CHUNK_LENGTH]> = self.received.values().collect();

        let mut out = Vec::with_capacity(self.needed * CHUNK_LENGTH);
        for index in 0..self.needed as u16 {
            match self.received.get(&index) {
                Some(block) => out.extend_from_slice(block),
                None => out.extend_from_slice(&interpolate(&points, &blocks, index)),
            }
        }
        Some(out)
    }
}
