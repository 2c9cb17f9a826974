use chacha20poly1305::{
    aead::{Aead, Payload},
    ChaCha20Poly1305, Key as AeadKeyChacha, KeyInit, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::provider::{CryptoProvider, HMAC_OUTPUT_LENGTH};
use crate::error::CryptoError;

const AEAD_KEY_LENGTH: usize = 32;
const AEAD_NONCE_LENGTH: usize = 12;

const ROOT_KEY_INFO: &[u8] = b"WhisperRatchet";
const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

/// Concrete implementation of `CryptoProvider` for the classic suite:
/// ChaCha20-Poly1305, HKDF-SHA256, HMAC-SHA256.
pub struct ClassicSuiteProvider;

fn cipher_for(key: &[u8], nonce: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
    if key.len() != AEAD_KEY_LENGTH {
        return Err(CryptoError::InvalidInputError(format!(
            "AEAD key must be {} bytes, got {}",
            AEAD_KEY_LENGTH,
            key.len()
        )));
    }
    if nonce.len() != AEAD_NONCE_LENGTH {
        return Err(CryptoError::InvalidInputError(format!(
            "AEAD nonce must be {} bytes, got {}",
            AEAD_NONCE_LENGTH,
            nonce.len()
        )));
    }
    Ok(ChaCha20Poly1305::new(AeadKeyChacha::from_slice(key)))
}

impl CryptoProvider for ClassicSuiteProvider {
    fn aead_encrypt(
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = cipher_for(key, nonce)?;
        let payload = Payload {
            msg: plaintext,
            aad: associated_data,
        };
        cipher
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))
    }

    fn aead_decrypt(
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = cipher_for(key, nonce)?;
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data,
        };
        cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))
    }

    fn hkdf_derive_key(
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(salt, ikm);
        let mut okm = vec![0u8; len];
        hkdf.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
        Ok(okm)
    }

    fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_OUTPUT_LENGTH], CryptoError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;
        for part in parts {
            mac.update(part);
        }
        let mut out = [0u8; HMAC_OUTPUT_LENGTH];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn kdf_rk(root_key: &[u8], dh_output: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
        let mut output = Self::hkdf_derive_key(Some(root_key), dh_output, ROOT_KEY_INFO, 64)?;

        let mut new_root_key = [0u8; 32];
        let mut chain_key = [0u8; 32];
        new_root_key.copy_from_slice(&output[..32]);
        chain_key.copy_from_slice(&output[32..]);
        output.zeroize();

        Ok((new_root_key, chain_key))
    }

    fn kdf_ck(chain_key: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
        let message_key_seed = Self::hmac(chain_key, &[&[MESSAGE_KEY_SEED]])?;
        let next_chain_key = Self::hmac(chain_key, &[&[CHAIN_KEY_SEED]])?;
        Ok((message_key_seed, next_chain_key))
    }

    fn suite_id() -> u16 {
        crate::config::Config::global().classic_suite_id
    }
}
