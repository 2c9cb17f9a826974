//! X3DH / PQXDH
//!
//! Начальное согласование ключей сессии.
//!
//! ## Ключи
//!
//! ### Alice (инициатор)
//! - **IK_A**: Identity Key (долгосрочный)
//! - **EK_A**: Base Key (одноразовый, генерируется для каждой сессии)
//!
//! ### Bob (получатель)
//! - **IK_B**: Identity Key
//! - **SPK_B**: Signed Prekey (он же первый ratchet ключ Bob)
//! - **OPK_B**: One-time Prekey (необязательный)
//! - **PQSPK_B**: Kyber prekey, ML-KEM-768 (необязательный, даёт версию 4)
//!
//! ## Протокол
//!
//! ```text
//! Alice                                          Bob
//! =====                                          ===
//! DH1 = DH(IK_A, SPK_B)                          DH1 = DH(SPK_B, IK_A)
//! DH2 = DH(EK_A, IK_B)                           DH2 = DH(IK_B, EK_A)
//! DH3 = DH(EK_A, SPK_B)                          DH3 = DH(SPK_B, EK_A)
//! DH4 = DH(EK_A, OPK_B)        [если есть]       DH4 = DH(OPK_B, EK_A)
//! (ct, SS) = Encaps(PQSPK_B)   [если есть]       SS = Decaps(PQSPK_B, ct)
//!
//! secret = 0xFF * 32 || DH1 || DH2 || DH3 [|| DH4] [|| SS]
//! root_key || chain_key = HKDF(salt = none, secret, label)[0..64]
//! spqr_auth_key         = HKDF(salt = none, secret, label ":SPQR")[0..32]
//! ```
//!
//! Порядок секретов у обеих сторон одинаков, поэтому конкатенации
//! совпадают побайтно.

use rand_core::{CryptoRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::kem;
use crate::crypto::keys::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey};
use crate::crypto::messaging::ratchet_keys::{ChainKey, RootKey};
use crate::crypto::messaging::session_state::SessionState;
use crate::crypto::provider::CryptoProvider;
use crate::error::{ProtocolError, Result};
use crate::protocol::messages::{
    CIPHERTEXT_MESSAGE_CURRENT_VERSION, CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION,
};
use crate::spqr;

const X3DH_LABEL: &[u8] = b"WhisperText";
const PQXDH_LABEL: &[u8] = b"WhisperText_X25519_SHA-256_ML-KEM-768";
const SPQR_LABEL_SUFFIX: &[u8] = b":SPQR";
const DISCONTINUITY_BYTES: [u8; 32] = [0xFF; 32];

/// Включать ли SPQR в новых сессиях
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsePqRatchet {
    #[default]
    Yes,
    No,
}

/// Параметры инициатора
pub struct AliceParameters<'a> {
    pub our_identity_key_pair: &'a IdentityKeyPair,
    pub our_base_key_pair: KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_signed_pre_key: PublicKey,
    pub their_one_time_pre_key: Option<PublicKey>,
    /// Первый ratchet ключ Bob; это его signed prekey
    pub their_ratchet_key: PublicKey,
    /// Encapsulation key Kyber prekey Bob
    pub their_kyber_pre_key: Option<&'a [u8]>,
    pub use_pq_ratchet: UsePqRatchet,
}

/// Параметры получателя
pub struct BobParameters<'a> {
    pub our_identity_key_pair: &'a IdentityKeyPair,
    pub our_signed_pre_key_pair: KeyPair,
    pub our_one_time_pre_key_pair: Option<KeyPair>,
    pub our_ratchet_key_pair: KeyPair,
    pub our_kyber_pre_key_pair: Option<&'a kem::KeyPair>,
    pub their_identity_key: IdentityKey,
    pub their_base_key: PublicKey,
    pub their_kyber_ciphertext: Option<&'a [u8]>,
    pub use_pq_ratchet: UsePqRatchet,
}

/// Результат инициатора: сессия и Kyber ciphertext для PreKeySignalMessage
pub struct AliceSession {
    pub state: SessionState,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

struct DerivedKeys {
    root_key: RootKey,
    chain_key: ChainKey,
    pqr_key: Zeroizing<Vec<u8>>,
}

fn derive_keys<P: CryptoProvider>(secret_input: &[u8], has_kyber: bool) -> Result<DerivedKeys> {
    let label = if has_kyber { PQXDH_LABEL } else { X3DH_LABEL };
    let okm = Zeroizing::new(P::hkdf_derive_key(None, secret_input, label, 64)?);

    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);

    let spqr_label = [label, SPQR_LABEL_SUFFIX].concat();
    let pqr_key = Zeroizing::new(P::hkdf_derive_key(None, secret_input, &spqr_label, 32)?);

    Ok(DerivedKeys {
        root_key: RootKey::new(root),
        chain_key: ChainKey::new(chain, 0),
        pqr_key,
    })
}

fn session_version(has_kyber: bool) -> u8 {
    if has_kyber {
        CIPHERTEXT_MESSAGE_CURRENT_VERSION
    } else {
        CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION
    }
}

fn initial_pq_state(
    version: u8,
    use_pq_ratchet: UsePqRatchet,
    direction: spqr::Direction,
    auth_key: &[u8],
    session_with_self: bool,
) -> Result<Vec<u8>> {
    let pq_version = match (version, use_pq_ratchet) {
        (CIPHERTEXT_MESSAGE_CURRENT_VERSION, UsePqRatchet::Yes) => spqr::Version::V1,
        _ => spqr::Version::V0,
    };
    let mut chain_params = spqr::ChainParams::default();
    // другое устройство того же аккаунта может долго писать без ответа
    if session_with_self {
        chain_params.max_jump = u32::MAX;
    }
    Ok(spqr::initial_state(spqr::Params {
        direction,
        version: pq_version,
        // собеседник без SPQR остаётся совместимым
        min_version: spqr::Version::V0,
        auth_key,
        chain_params,
        chunking: spqr::Chunking::Chunked,
    })?)
}

pub fn initialize_alice_session<P, R>(
    parameters: AliceParameters<'_>,
    rng: &mut R,
) -> Result<AliceSession>
where
    P: CryptoProvider,
    R: RngCore + CryptoRng,
{
    let our_base_private = &parameters.our_base_key_pair.private_key;
    let has_kyber = parameters.their_kyber_pre_key.is_some();

    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 6));
    secrets.extend_from_slice(&DISCONTINUITY_BYTES);
    secrets.extend_from_slice(
        &parameters
            .our_identity_key_pair
            .private_key()
            .calculate_agreement(&parameters.their_signed_pre_key)?,
    );
    secrets.extend_from_slice(
        &our_base_private.calculate_agreement(parameters.their_identity_key.public_key())?,
    );
    secrets.extend_from_slice(&our_base_private.calculate_agreement(&parameters.their_signed_pre_key)?);
    if let Some(their_one_time_pre_key) = &parameters.their_one_time_pre_key {
        secrets.extend_from_slice(&our_base_private.calculate_agreement(their_one_time_pre_key)?);
    }

    let kyber_ciphertext = match parameters.their_kyber_pre_key {
        Some(encapsulation_key) => {
            let (ciphertext, shared_secret) = kem::encapsulate(encapsulation_key, rng)?;
            let shared_secret = Zeroizing::new(shared_secret);
            secrets.extend_from_slice(&shared_secret[..]);
            Some(ciphertext)
        }
        None => None,
    };

    let version = session_version(has_kyber);
    let keys = derive_keys::<P>(&secrets, has_kyber)?;

    // Alice сразу делает DH шаг к ratchet ключу Bob
    let sending_ratchet_key = KeyPair::generate(rng);
    let (sending_root_key, sending_chain_key) = keys
        .root_key
        .create_chain::<P>(&parameters.their_ratchet_key, &sending_ratchet_key.private_key)?;

    let mut state = SessionState::new(
        version,
        parameters.our_identity_key_pair.identity_key(),
        &parameters.their_identity_key,
        &sending_root_key,
        &parameters.our_base_key_pair.public_key,
    );
    state.add_receiver_chain(&parameters.their_ratchet_key, &keys.chain_key);
    state.set_sender_chain(&sending_ratchet_key, &sending_chain_key);
    state.set_pq_ratchet_state(initial_pq_state(
        version,
        parameters.use_pq_ratchet,
        spqr::Direction::A2B,
        &keys.pqr_key,
        parameters.our_identity_key_pair.identity_key() == &parameters.their_identity_key,
    )?);

    debug!(
        target: "crypto::pqxdh",
        version,
        one_time_pre_key = parameters.their_one_time_pre_key.is_some(),
        kyber = has_kyber,
        "Initialized initiator session"
    );

    Ok(AliceSession {
        state,
        kyber_ciphertext,
    })
}

pub fn initialize_bob_session<P: CryptoProvider>(parameters: BobParameters<'_>) -> Result<SessionState> {
    // неканоническая кодировка base key означает подделанное сообщение
    if !parameters.their_base_key.is_canonical() {
        return Err(ProtocolError::InvalidMessage(
            "base key is not a canonical X25519 point".to_string(),
        ));
    }

    let has_kyber = match (parameters.our_kyber_pre_key_pair, parameters.their_kyber_ciphertext) {
        (Some(_), Some(_)) => true,
        (None, None) => false,
        _ => {
            return Err(ProtocolError::InvalidMessage(
                "Kyber prekey and ciphertext must be used together".to_string(),
            ))
        }
    };

    let our_signed_private = &parameters.our_signed_pre_key_pair.private_key;

    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 6));
    secrets.extend_from_slice(&DISCONTINUITY_BYTES);
    secrets.extend_from_slice(
        &our_signed_private.calculate_agreement(parameters.their_identity_key.public_key())?,
    );
    secrets.extend_from_slice(
        &parameters
            .our_identity_key_pair
            .private_key()
            .calculate_agreement(&parameters.their_base_key)?,
    );
    secrets.extend_from_slice(&our_signed_private.calculate_agreement(&parameters.their_base_key)?);
    if let Some(our_one_time_pre_key_pair) = &parameters.our_one_time_pre_key_pair {
        secrets.extend_from_slice(
            &our_one_time_pre_key_pair
                .private_key
                .calculate_agreement(&parameters.their_base_key)?,
        );
    }

    if let (Some(kyber_pair), Some(ciphertext)) = (
        parameters.our_kyber_pre_key_pair,
        parameters.their_kyber_ciphertext,
    ) {
        let shared_secret = Zeroizing::new(kem::decapsulate(
            &kyber_pair.decapsulation_key,
            ciphertext,
        )?);
        secrets.extend_from_slice(&shared_secret[..]);
    }

    let version = session_version(has_kyber);
    let keys = derive_keys::<P>(&secrets, has_kyber)?;

    let mut state = SessionState::new(
        version,
        parameters.our_identity_key_pair.identity_key(),
        &parameters.their_identity_key,
        &keys.root_key,
        &parameters.their_base_key,
    );
    state.set_sender_chain(&parameters.our_ratchet_key_pair, &keys.chain_key);
    state.set_pq_ratchet_state(initial_pq_state(
        version,
        parameters.use_pq_ratchet,
        spqr::Direction::B2A,
        &keys.pqr_key,
        parameters.our_identity_key_pair.identity_key() == &parameters.their_identity_key,
    )?);

    debug!(
        target: "crypto::pqxdh",
        version,
        one_time_pre_key = parameters.our_one_time_pre_key_pair.is_some(),
        kyber = has_kyber,
        "Initialized responder session"
    );

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::classic::ClassicSuiteProvider;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type Suite = ClassicSuiteProvider;

    struct Fixture {
        alice_identity: IdentityKeyPair,
        bob_identity: IdentityKeyPair,
        alice_base: KeyPair,
        bob_signed: KeyPair,
        bob_one_time: KeyPair,
        bob_kyber: kem::KeyPair,
    }

    fn fixture(rng: &mut StdRng) -> Fixture {
        Fixture {
            alice_identity: IdentityKeyPair::generate(rng),
            bob_identity: IdentityKeyPair::generate(rng),
            alice_base: KeyPair::generate(rng),
            bob_signed: KeyPair::generate(rng),
            bob_one_time: KeyPair::generate(rng),
            bob_kyber: kem::KeyPair::generate(rng),
        }
    }

    fn run(rng: &mut StdRng, f: &Fixture, kyber: bool) -> (SessionState, SessionState) {
        let alice = initialize_alice_session::<Suite, _>(
            AliceParameters {
                our_identity_key_pair: &f.alice_identity,
                our_base_key_pair: f.alice_base.clone(),
                their_identity_key: *f.bob_identity.identity_key(),
                their_signed_pre_key: f.bob_signed.public_key,
                their_one_time_pre_key: Some(f.bob_one_time.public_key),
                their_ratchet_key: f.bob_signed.public_key,
                their_kyber_pre_key: kyber.then_some(f.bob_kyber.encapsulation_key.as_slice()),
                use_pq_ratchet: UsePqRatchet::Yes,
            },
            rng,
        )
        .unwrap();

        let bob = initialize_bob_session::<Suite>(BobParameters {
            our_identity_key_pair: &f.bob_identity,
            our_signed_pre_key_pair: f.bob_signed.clone(),
            our_one_time_pre_key_pair: Some(f.bob_one_time.clone()),
            our_ratchet_key_pair: f.bob_signed.clone(),
            our_kyber_pre_key_pair: kyber.then_some(&f.bob_kyber),
            their_identity_key: *f.alice_identity.identity_key(),
            their_base_key: f.alice_base.public_key,
            their_kyber_ciphertext: alice.kyber_ciphertext.as_deref(),
            use_pq_ratchet: UsePqRatchet::Yes,
        })
        .unwrap();

        (alice.state, bob)
    }

    #[test]
    fn test_both_sides_agree_on_initial_chain() {
        let mut rng = StdRng::seed_from_u64(50);
        let f = fixture(&mut rng);
        for kyber in [false, true] {
            let (alice, bob) = run(&mut rng, &f, kyber);

            // receiver chain Alice совпадает с sender chain Bob
            let alice_receiver = alice
                .get_receiver_chain_key(&f.bob_signed.public_key)
                .unwrap()
                .unwrap();
            assert_eq!(alice_receiver, bob.get_sender_chain_key().unwrap());

            let expected = if kyber { 4 } else { 3 };
            assert_eq!(alice.session_version().unwrap(), expected);
            assert_eq!(bob.session_version().unwrap(), expected);
            assert_eq!(alice.alice_base_key(), bob.alice_base_key());

            // SPQR включён только для PQXDH
            assert_eq!(alice.pq_ratchet_state().is_empty(), !kyber);
            assert_eq!(bob.pq_ratchet_state().is_empty(), !kyber);
        }
    }

    #[test]
    fn test_bob_rejects_non_canonical_base_key() {
        let mut rng = StdRng::seed_from_u64(51);
        let f = fixture(&mut rng);
        let mut bytes = f.alice_base.public_key.serialize();
        bytes[31] |= 0x80;

        let result = initialize_bob_session::<Suite>(BobParameters {
            our_identity_key_pair: &f.bob_identity,
            our_signed_pre_key_pair: f.bob_signed.clone(),
            our_one_time_pre_key_pair: None,
            our_ratchet_key_pair: f.bob_signed.clone(),
            our_kyber_pre_key_pair: None,
            their_identity_key: *f.alice_identity.identity_key(),
            their_base_key: PublicKey::from_bytes(bytes),
            their_kyber_ciphertext: None,
            use_pq_ratchet: UsePqRatchet::Yes,
        });
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_kyber_changes_derived_keys() {
        let mut rng = StdRng::seed_from_u64(52);
        let f = fixture(&mut rng);
        let (_, classic) = run(&mut rng, &f, false);
        let (_, hybrid) = run(&mut rng, &f, true);
        assert_ne!(
            classic.get_sender_chain_key().unwrap(),
            hybrid.get_sender_chain_key().unwrap()
        );
    }
}
