//! Tests for the cryptographic primitives behind sessions
//!
//! This test suite covers:
//! - Classic Suite Provider (ChaCha20-Poly1305, HKDF, HMAC)
//! - Curve25519 keys and XEdDSA signatures
//! - ML-KEM-768 and its incremental encapsulation
//! - Ratchet key derivation

use construct_spqr::crypto::kem;
use construct_spqr::crypto::keys::{IdentityKeyPair, KeyPair, PublicKey};
use construct_spqr::crypto::messaging::{ChainKey, RootKey};
use construct_spqr::crypto::suites::classic::ClassicSuiteProvider;
use construct_spqr::crypto::CryptoProvider;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Test AEAD encryption and decryption
#[test]
fn test_classic_suite_aead_encrypt_decrypt() {
    let key = [0u8; 32];
    let nonce = [7u8; 12];
    let plaintext = b"Secret message for encryption test";
    let aad = b"associated data";

    let ciphertext = ClassicSuiteProvider::aead_encrypt(&key, &nonce, plaintext, aad).unwrap();

    // Ciphertext should be plaintext + 16-byte tag
    assert_eq!(ciphertext.len(), plaintext.len() + 16, "Ciphertext length incorrect");

    let decrypted = ClassicSuiteProvider::aead_decrypt(&key, &nonce, &ciphertext, aad).unwrap();
    assert_eq!(decrypted, plaintext, "Decrypted plaintext doesn't match");
}

/// Test that AEAD decryption fails with wrong key
#[test]
fn test_classic_suite_aead_decrypt_fails_with_wrong_key() {
    let nonce = [0u8; 12];
    let ciphertext =
        ClassicSuiteProvider::aead_encrypt(&[0u8; 32], &nonce, b"Secret message", &[]).unwrap();

    let result = ClassicSuiteProvider::aead_decrypt(&[1u8; 32], &nonce, &ciphertext, &[]);
    assert!(result.is_err(), "Decryption should fail with wrong key");
}

/// Test that AEAD decryption fails with wrong nonce or associated data
#[test]
fn test_classic_suite_aead_decrypt_fails_with_wrong_nonce() {
    let key = [0u8; 32];
    let ciphertext =
        ClassicSuiteProvider::aead_encrypt(&key, &[1u8; 12], b"Secret message", b"ad").unwrap();

    assert!(ClassicSuiteProvider::aead_decrypt(&key, &[2u8; 12], &ciphertext, b"ad").is_err());
    assert!(ClassicSuiteProvider::aead_decrypt(&key, &[1u8; 12], &ciphertext, b"da").is_err());
}

#[test]
fn test_classic_suite_rejects_bad_nonce_length() {
    assert!(ClassicSuiteProvider::aead_encrypt(&[0u8; 32], &[0u8; 16], b"x", &[]).is_err());
}

/// Test HKDF key derivation
#[test]
fn test_classic_suite_hkdf() {
    let salt = b"test_salt";
    let ikm = b"input_key_material_for_derivation";
    let info = b"context_info";

    let key = ClassicSuiteProvider::hkdf_derive_key(Some(salt), ikm, info, 76).unwrap();
    assert_eq!(key.len(), 76, "Derived key length incorrect");

    // Verify determinism: same inputs should give same output
    let again = ClassicSuiteProvider::hkdf_derive_key(Some(salt), ikm, info, 76).unwrap();
    assert_eq!(key, again, "HKDF should be deterministic");

    let unsalted = ClassicSuiteProvider::hkdf_derive_key(None, ikm, info, 76).unwrap();
    assert_ne!(key, unsalted);
}

/// RFC 4231 test case 2
#[test]
fn test_classic_suite_hmac_vector() {
    let mac = ClassicSuiteProvider::hmac(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
    assert_eq!(
        hex::encode(mac),
        "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
    );
}

/// Test KDF_RK (Root Key Derivation)
#[test]
fn test_classic_suite_kdf_rk() {
    let root_key = [0u8; 32];
    let (new_root_key, chain_key) = ClassicSuiteProvider::kdf_rk(&root_key, &[1u8; 32]).unwrap();

    assert_ne!(new_root_key, root_key, "New root key should differ");
    assert_ne!(new_root_key, chain_key);
}

/// Test KDF_CK (Chain Key Derivation)
#[test]
fn test_classic_suite_kdf_ck() {
    let (message_key_seed, next_chain_key) = ClassicSuiteProvider::kdf_ck(&[0u8; 32]).unwrap();
    assert_ne!(message_key_seed, next_chain_key);

    let expected_seed = ClassicSuiteProvider::hmac(&[0u8; 32], &[&[0x01]]).unwrap();
    let expected_next = ClassicSuiteProvider::hmac(&[0u8; 32], &[&[0x02]]).unwrap();
    assert_eq!(message_key_seed, expected_seed);
    assert_eq!(next_chain_key, expected_next);
}

#[test]
fn test_x25519_agreement_is_symmetric() {
    let mut rng = StdRng::seed_from_u64(1);
    let alice = KeyPair::generate(&mut rng);
    let bob = KeyPair::generate(&mut rng);

    assert_eq!(
        alice.calculate_agreement(&bob.public_key).unwrap(),
        bob.calculate_agreement(&alice.public_key).unwrap()
    );
}

#[test]
fn test_low_order_public_key_is_rejected_for_agreement() {
    let mut rng = StdRng::seed_from_u64(2);
    let ours = KeyPair::generate(&mut rng);
    let zero = PublicKey::from_bytes([0u8; 32]);

    assert!(zero.is_low_order());
    assert!(ours.calculate_agreement(&zero).is_err());
}

#[test]
fn test_xeddsa_signature_verifies_with_identity_key() {
    let mut rng = StdRng::seed_from_u64(3);
    let identity = IdentityKeyPair::generate(&mut rng);
    let message = b"Hello, Construct Messenger!";

    let signature = identity.sign(message);
    assert_eq!(signature.len(), 64, "Signature should be 64 bytes");
    assert!(identity.identity_key().verify_signature(message, &signature));

    // Verification should fail with wrong message
    assert!(!identity
        .identity_key()
        .verify_signature(b"Wrong message", &signature));

    let other = IdentityKeyPair::generate(&mut rng);
    assert!(!other.identity_key().verify_signature(message, &signature));
}

#[test]
fn test_identity_key_pair_serialization() {
    let mut rng = StdRng::seed_from_u64(4);
    let identity = IdentityKeyPair::generate(&mut rng);
    let restored = IdentityKeyPair::deserialize(&identity.serialize()).unwrap();
    assert_eq!(restored.identity_key(), identity.identity_key());
}

#[test]
fn test_ml_kem_encapsulate_decapsulate() {
    let mut rng = StdRng::seed_from_u64(5);
    let key_pair = kem::KeyPair::generate(&mut rng);
    assert_eq!(key_pair.encapsulation_key.len(), kem::ENCAPSULATION_KEY_LENGTH);
    assert_eq!(key_pair.decapsulation_key.len(), kem::DECAPSULATION_KEY_LENGTH);

    let (ciphertext, sent) = kem::encapsulate(&key_pair.encapsulation_key, &mut rng).unwrap();
    assert_eq!(ciphertext.len(), kem::CIPHERTEXT_LENGTH);
    let received = kem::decapsulate(&key_pair.decapsulation_key, &ciphertext).unwrap();
    assert_eq!(sent, received);
}

#[test]
fn test_ml_kem_tampered_ciphertext_gives_different_secret() {
    let mut rng = StdRng::seed_from_u64(6);
    let key_pair = kem::KeyPair::generate(&mut rng);
    let (mut ciphertext, sent) =
        kem::encapsulate(&key_pair.encapsulation_key, &mut rng).unwrap();
    ciphertext[0] ^= 0x01;

    let received = kem::decapsulate(&key_pair.decapsulation_key, &ciphertext).unwrap();
    assert_ne!(sent, received);
}

#[test]
fn test_ml_kem_rejects_wrong_lengths() {
    let mut rng = StdRng::seed_from_u64(7);
    assert!(kem::encapsulate(&[0u8; 10], &mut rng).is_err());
    let key_pair = kem::KeyPair::generate(&mut rng);
    assert!(kem::decapsulate(&key_pair.decapsulation_key, &[0u8; 10]).is_err());
}

#[test]
fn test_ml_kem_key_generation_is_deterministic_from_seed() {
    let a = kem::KeyPair::from_seed(&[1u8; 32], &[2u8; 32]);
    let b = kem::KeyPair::from_seed(&[1u8; 32], &[2u8; 32]);
    assert_eq!(a.encapsulation_key, b.encapsulation_key);
    assert_eq!(a.header(), kem::header_for(&a.encapsulation_key).unwrap());
    assert!(kem::ek_matches_header(&a.header(), a.ek_vector()));
}

#[test]
fn test_root_and_chain_keys_agree_between_parties() {
    let mut rng = StdRng::seed_from_u64(8);
    let alice = KeyPair::generate(&mut rng);
    let bob = KeyPair::generate(&mut rng);
    let root = RootKey::new([3u8; 32]);

    let (alice_root, alice_chain) = root
        .create_chain::<ClassicSuiteProvider>(&bob.public_key, &alice.private_key)
        .unwrap();
    let (bob_root, bob_chain) = root
        .create_chain::<ClassicSuiteProvider>(&alice.public_key, &bob.private_key)
        .unwrap();
    assert_eq!(alice_root.key(), bob_root.key());
    assert!(alice_chain == bob_chain);
    assert_eq!(alice_chain.index(), 0);

    let next: ChainKey = alice_chain.next_chain_key::<ClassicSuiteProvider>().unwrap();
    assert_eq!(next.index(), 1);
}
