//! XEdDSA: Ed25519-подписи ключами X25519
//!
//! Подпись и проверка делает крейт `xeddsa`. Он берёт 64 байта случайности Z
//! на каждую подпись; здесь Z выводится из приватного ключа и сообщения,
//! поэтому одна и та же пара (ключ, сообщение) всегда даёт одну подпись.

use rand_core::{impls, CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};
use ::xeddsa::xed25519::{PrivateKey as XEdPrivate, PublicKey as XEdPublic};
use ::xeddsa::{Sign, Verify};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SIGNATURE_LENGTH: usize = 64;

const NONCE_LABEL: &[u8] = b"Construct_XEdDSA_Nonce";

/// Детерминированный поток Z: SHA-512(seed ‖ block) по блокам
#[derive(Zeroize, ZeroizeOnDrop)]
struct NonceStream {
    seed: [u8; 64],
    block: [u8; 64],
    block_index: u32,
    position: usize,
}

impl NonceStream {
    fn new(private_key: &[u8; 32], message: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(NONCE_LABEL);
        hasher.update(private_key);
        hasher.update(message);
        let mut seed = [0u8; 64];
        seed.copy_from_slice(&hasher.finalize());

        let mut stream = Self {
            seed,
            block: [0u8; 64],
            block_index: 0,
            position: 0,
        };
        stream.refill();
        stream
    }

    fn refill(&mut self) {
        let mut hasher = Sha512::new();
        hasher.update(self.seed);
        hasher.update(self.block_index.to_be_bytes());
        self.block.copy_from_slice(&hasher.finalize());
        self.block_index = self.block_index.wrapping_add(1);
        self.position = 0;
    }
}

impl RngCore for NonceStream {
    fn next_u32(&mut self) -> u32 {
        impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            if self.position == self.block.len() {
                self.refill();
            }
            *byte = self.block[self.position];
            self.position += 1;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

// Z секретен: выводится из приватного ключа
impl CryptoRng for NonceStream {}

/// Подписать сообщение приватным ключом X25519
pub fn sign(private_key: &[u8; 32], message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    let secret = StaticSecret::from(*private_key);
    let signing_key = XEdPrivate::from(&secret);
    let mut nonce = NonceStream::new(private_key, message);
    signing_key.sign(message, &mut nonce)
}

/// Проверить подпись по Montgomery u-координате публичного ключа
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let signature: &[u8; SIGNATURE_LENGTH] = match signature.try_into() {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    let verifying_key = XEdPublic::from(&DalekPublicKey::from(*public_key));
    verifying_key.verify(message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn key_pair(rng: &mut StdRng) -> ([u8; 32], [u8; 32]) {
        let secret = StaticSecret::random_from_rng(&mut *rng);
        let public = DalekPublicKey::from(&secret);
        (secret.to_bytes(), public.to_bytes())
    }

    #[test]
    fn test_sign_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        let (private_key, public_key) = key_pair(&mut rng);

        let first = sign(&private_key, b"signed prekey");
        assert_eq!(first, sign(&private_key, b"signed prekey"));
        assert_ne!(first, sign(&private_key, b"another prekey"));
        assert!(verify(&public_key, b"signed prekey", &first));
    }

    #[test]
    fn test_randomized_signatures_from_the_library_verify() {
        let mut rng = StdRng::seed_from_u64(2);
        let (private_key, public_key) = key_pair(&mut rng);
        let signing_key = XEdPrivate::from(&StaticSecret::from(private_key));

        let signature: [u8; SIGNATURE_LENGTH] = signing_key.sign(b"message", &mut rng);
        assert!(verify(&public_key, b"message", &signature));
    }

    #[test]
    fn test_verify_rejects_bad_input() {
        let mut rng = StdRng::seed_from_u64(3);
        let (private_key, public_key) = key_pair(&mut rng);
        let (_, other_public) = key_pair(&mut rng);
        let signature = sign(&private_key, b"message");

        assert!(!verify(&other_public, b"message", &signature));
        assert!(!verify(&public_key, b"message", &signature[..63]));

        let mut tampered = signature;
        tampered[10] ^= 0x01;
        assert!(!verify(&public_key, b"message", &tampered));
    }

    #[test]
    fn test_nonce_stream_continues_past_one_block() {
        let mut stream = NonceStream::new(&[7u8; 32], b"m");
        let mut first = [0u8; 64];
        let mut second = [0u8; 64];
        stream.fill_bytes(&mut first);
        stream.fill_bytes(&mut second);
        assert_ne!(first, second);

        let mut again = NonceStream::new(&[7u8; 32], b"m");
        let mut replay = [0u8; 128];
        again.fill_bytes(&mut replay);
        assert_eq!(&replay[..64], &first[..]);
        assert_eq!(&replay[64..], &second[..]);
    }
}
