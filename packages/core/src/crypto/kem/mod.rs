//! ML-KEM-768 (FIPS 203) и его инкрементальное разбиение для SPQR
//!
//! Тонкая обёртка над `libcrux-ml-kem`: ключи и ciphertext хранятся как
//! байты, длины проверяются здесь, сама арифметика в libcrux.
//!
//! ## Инкрементальная инкапсуляция
//!
//! Ключ инкапсуляции `ek = ByteEncode12(t̂) ‖ ρ` делится на две части:
//!
//! ```text
//! header    = ρ ‖ H(ek)                (64 байта)
//! ek_vector = ByteEncode12(t̂)          (1152 байта)
//! ```
//!
//! Отправитель ciphertext может выполнить первую половину шифрования,
//! имея только header:
//!
//! ```text
//! encaps1(header)           → ct1 (960 байт) + общий секрет K
//! encaps2(state, ek_vector) → ct2 (128 байт)
//! ```
//!
//! `ct1 ‖ ct2` является обычным ciphertext ML-KEM-768 и расшифровывается
//! стандартным `decapsulate`.

use libcrux_ml_kem::mlkem768::{
    self, incremental, MlKem768Ciphertext, MlKem768PrivateKey, MlKem768PublicKey,
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const ENCAPSULATION_KEY_LENGTH: usize = 1184;
pub const DECAPSULATION_KEY_LENGTH: usize = 2400;
pub const CIPHERTEXT_LENGTH: usize = CT1_LENGTH + CT2_LENGTH;
pub const SHARED_SECRET_LENGTH: usize = 32;

pub const HEADER_LENGTH: usize = 64;
pub const EK_VECTOR_LENGTH: usize = 1152;
pub const CT1_LENGTH: usize = 960;
pub const CT2_LENGTH: usize = 128;

/// d ‖ z для ML-KEM.KeyGen_internal
const KEY_GENERATION_SEED_LENGTH: usize = 64;

pub type SharedSecret = [u8; SHARED_SECRET_LENGTH];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KemError {
    #[error("{what} must be {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("encapsulation key has coefficients outside [0, q)")]
    InvalidEncapsulationKey,
    #[error("decapsulation key hash check failed")]
    InvalidDecapsulationKey,
    #[error("encapsulation key does not match header")]
    EkHeaderMismatch,
    #[error("incremental encapsulation failed")]
    Encapsulation,
}

fn to_array<const N: usize>(what: &'static str, bytes: &[u8]) -> Result<[u8; N], KemError> {
    bytes.try_into().map_err(|_| KemError::InvalidLength {
        what,
        expected: N,
        actual: bytes.len(),
    })
}

/// H из FIPS 203
fn hash_h(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

// ============================================================================
// ML-KEM
// ============================================================================

/// Пара ключей ML-KEM-768
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub encapsulation_key: Vec<u8>,
    pub decapsulation_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("encapsulation_key_len", &self.encapsulation_key.len())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut d = [0u8; 32];
        let mut z = [0u8; 32];
        rng.fill_bytes(&mut d);
        rng.fill_bytes(&mut z);
        let pair = Self::from_seed(&d, &z);
        d.zeroize();
        z.zeroize();
        pair
    }

    /// ML-KEM.KeyGen_internal(d, z)
    pub fn from_seed(d: &[u8; 32], z: &[u8; 32]) -> Self {
        let mut seed = [0u8; KEY_GENERATION_SEED_LENGTH];
        seed[..32].copy_from_slice(d);
        seed[32..].copy_from_slice(z);
        let pair = mlkem768::generate_key_pair(seed);
        seed.zeroize();

        Self {
            encapsulation_key: pair.public_key().as_slice().to_vec(),
            decapsulation_key: pair.private_key().as_slice().to_vec(),
        }
    }

    /// Header для инкрементальной инкапсуляции
    pub fn header(&self) -> [u8; HEADER_LENGTH] {
        // длина ek фиксирована конструктором
        split_header(&self.encapsulation_key)
    }

    pub fn ek_vector(&self) -> &[u8] {
        &self.encapsulation_key[..EK_VECTOR_LENGTH]
    }
}

fn split_header(ek: &[u8]) -> [u8; HEADER_LENGTH] {
    let mut header = [0u8; HEADER_LENGTH];
    header[..32].copy_from_slice(&ek[EK_VECTOR_LENGTH..]);
    header[32..].copy_from_slice(&hash_h(&[ek]));
    header
}

/// Header (ρ ‖ H(ek)) для произвольного ключа инкапсуляции
pub fn header_for(ek: &[u8]) -> Result<[u8; HEADER_LENGTH], KemError> {
    let _: [u8; ENCAPSULATION_KEY_LENGTH] = to_array("encapsulation key", ek)?;
    Ok(split_header(ek))
}

/// ML-KEM.Encaps с проверкой модуля ключа (FIPS 203, 7.2)
pub fn encapsulate<R: RngCore + CryptoRng>(
    ek: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, SharedSecret), KemError> {
    let public_key = MlKem768PublicKey::from(to_array::<ENCAPSULATION_KEY_LENGTH>(
        "encapsulation key",
        ek,
    )?);
    if !mlkem768::validate_public_key(&public_key) {
        return Err(KemError::InvalidEncapsulationKey);
    }

    let mut randomness = [0u8; SHARED_SECRET_LENGTH];
    rng.fill_bytes(&mut randomness);
    let (ciphertext, shared) = mlkem768::encapsulate(&public_key, randomness);
    randomness.zeroize();
    Ok((ciphertext.as_slice().to_vec(), shared))
}

/// ML-KEM.Decaps с неявным отказом
pub fn decapsulate(dk: &[u8], ciphertext: &[u8]) -> Result<SharedSecret, KemError> {
    let mut dk_bytes = to_array::<DECAPSULATION_KEY_LENGTH>("decapsulation key", dk)?;
    let ciphertext = MlKem768Ciphertext::from(to_array::<CIPHERTEXT_LENGTH>("ciphertext", ciphertext)?);

    // dk = dk_pke ‖ ek ‖ H(ek) ‖ z
    let ek = &dk[EK_VECTOR_LENGTH..EK_VECTOR_LENGTH + ENCAPSULATION_KEY_LENGTH];
    let ek_hash = &dk[EK_VECTOR_LENGTH + ENCAPSULATION_KEY_LENGTH..DECAPSULATION_KEY_LENGTH - 32];
    if !bool::from(hash_h(&[ek])[..].ct_eq(ek_hash)) {
        dk_bytes.zeroize();
        return Err(KemError::InvalidDecapsulationKey);
    }

    let private_key = MlKem768PrivateKey::from(dk_bytes);
    dk_bytes.zeroize();
    Ok(mlkem768::decapsulate(&private_key, &ciphertext))
}

// ============================================================================
// Инкрементальная инкапсуляция
// ============================================================================

/// Состояние libcrux между encaps1 и encaps2
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EncapsulationState {
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
}

impl std::fmt::Debug for EncapsulationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncapsulationState([REDACTED])")
    }
}

/// Проверить, что ek_vector соответствует header: H(ek_vector ‖ ρ) == H(ek)
pub fn ek_matches_header(header: &[u8], ek_vector: &[u8]) -> bool {
    if header.len() != HEADER_LENGTH || ek_vector.len() != EK_VECTOR_LENGTH {
        return false;
    }
    incremental::validate_pk_bytes(header, ek_vector).is_ok()
}

/// Шаг 1: ct1 и общий секрет по одному только header
pub fn encaps1<R: RngCore + CryptoRng>(
    header: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, EncapsulationState, SharedSecret), KemError> {
    let _: [u8; HEADER_LENGTH] = to_array("header", header)?;
    let mut randomness = [0u8; SHARED_SECRET_LENGTH];
    rng.fill_bytes(&mut randomness);

    let mut state = EncapsulationState {
        bytes: vec![0u8; incremental::encaps_state_len()],
    };
    let mut shared = [0u8; SHARED_SECRET_LENGTH];
    let ct1 = incremental::encapsulate1(header, randomness, &mut state.bytes, &mut shared)
        .map_err(|_| KemError::Encapsulation);
    randomness.zeroize();

    Ok((ct1?.value.to_vec(), state, shared))
}

/// Шаг 2: ct2 после получения ek_vector, совпадающего с header
pub fn encaps2(
    state: &EncapsulationState,
    header: &[u8],
    ek_vector: &[u8],
) -> Result<Vec<u8>, KemError> {
    let _: [u8; HEADER_LENGTH] = to_array("header", header)?;
    let _: [u8; EK_VECTOR_LENGTH] = to_array("encapsulation key vector", ek_vector)?;
    if !ek_matches_header(header, ek_vector) {
        return Err(KemError::EkHeaderMismatch);
    }

    let ct2 = incremental::encapsulate2(
        state
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| KemError::Encapsulation)?,
        ek_vector
            .try_into()
            .map_err(|_| KemError::EkHeaderMismatch)?,
    );
    Ok(ct2.value.to_vec())
}
