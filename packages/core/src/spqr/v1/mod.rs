//! Машины состояний SPQR V1
//!
//! Обмен ML-KEM внутри одной эпохи ведут две роли, которые меняются
//! местами каждую эпоху:
//!
//! ```text
//!   send_ek (владелец ключа)                send_ct (инкапсулятор)
//!   ────────────────────────                ──────────────────────
//!   KeysUnsampled ── header ‖ mac ───────▶  NoHeaderReceived
//!                                           HeaderReceived
//!   HeaderSent    ◀────────────── ct1 ────  Ct1Sent        (секрет эпохи готов)
//!   Ct1Received   ── ek ─────────────────▶  Ct1SentEkReceived
//!   EkSentCt1Rcvd ◀────────── ct2 ‖ mac ──  Ct2Sent
//!   (секрет эпохи готов)
//!   NoHeaderReceived(e+1) ── сообщение e+1 ─▶ KeysUnsampled(e+1)
//! ```
//!
//! [`unchunked`] передаёт каждую часть целиком, [`chunked`] режет их на
//! чанки erasure-кода, чтобы части помещались в любые сообщения.

pub mod chunked;
pub mod unchunked;

use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroize;

use super::authenticator::{Authenticator, MAC_LENGTH};
use super::chain::{EpochSecret, KEY_LENGTH};
use super::error::{Error, Result};
use super::message::{Message, Payload};
use super::Direction;
use crate::crypto::kem;

const EPOCH_SECRET_INFO: &[u8] = b"Signal_PQCKA_V1_MLKEM768:SCKA Key";

/// Результат отправки: следующее состояние и payload для сообщения
pub struct Sent<S> {
    pub state: S,
    pub payload: Payload,
    pub epoch_secret: Option<EpochSecret>,
}

/// Результат получения
pub struct Received<S> {
    pub state: S,
    pub epoch_secret: Option<EpochSecret>,
}

impl<S> Received<S> {
    fn unchanged(state: S) -> Self {
        Self {
            state,
            epoch_secret: None,
        }
    }
}

/// Общий интерфейс машин состояний (обе формы wire)
pub trait StateMachine: Sized {
    fn init(direction: Direction, auth_key: &[u8]) -> Result<Self>;

    fn epoch(&self) -> u64;

    /// Состояние завершило свою часть эпохи и ждёт сообщения эпохи e+1
    fn awaiting_next_epoch(&self) -> bool;

    /// Переход из терминального состояния в начало следующей эпохи
    fn into_next_epoch(self) -> Self;

    fn send<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<Sent<Self>>;

    /// Обработать payload эпохи, совпадающей с текущей
    fn recv_current(self, payload: &Payload) -> Result<Received<Self>>;

    /// Правила эпох, общие для обеих форм
    fn recv(self, message: &Message) -> Result<Received<Self>> {
        let epoch = self.epoch();
        if message.epoch < epoch {
            // запоздавшая копия payload прошлой эпохи
            return Ok(Received::unchanged(self));
        }
        if message.epoch == epoch {
            return self.recv_current(&message.payload);
        }
        if message.epoch == epoch + 1 && self.awaiting_next_epoch() {
            return self.into_next_epoch().recv_current(&message.payload);
        }
        Err(Error::EpochOutOfRange(message.epoch))
    }
}

/// Первая эпоха: A→B начинает с отправки ключа, B→A ждёт header
pub(crate) fn starts_as_key_owner(direction: Direction) -> bool {
    matches!(direction, Direction::A2B)
}

pub(crate) fn initial_authenticator(auth_key: &[u8]) -> Result<Authenticator> {
    Authenticator::new(auth_key, 1)
}

pub(crate) fn derive_epoch_secret(epoch: u64, shared_secret: &[u8]) -> Result<EpochSecret> {
    let mut info = Vec::with_capacity(EPOCH_SECRET_INFO.len() + 8);
    info.extend_from_slice(EPOCH_SECRET_INFO);
    info.extend_from_slice(&epoch.to_be_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; KEY_LENGTH]), shared_secret);
    let mut secret = [0u8; KEY_LENGTH];
    hkdf.expand(&info, &mut secret)?;
    Ok(EpochSecret { epoch, secret })
}

/// Ключи эпохи на стороне send_ek
pub(crate) struct SampledKeys {
    pub decapsulation_key: Vec<u8>,
    pub ek_vector: Vec<u8>,
    /// header ‖ mac
    pub header_payload: Vec<u8>,
}

pub(crate) fn sample_keys<R: RngCore + CryptoRng>(
    epoch: u64,
    auth: &Authenticator,
    rng: &mut R,
) -> Result<SampledKeys> {
    let keys = kem::KeyPair::generate(rng);
    let header = keys.header();
    let mac = auth.mac_hdr(epoch, &header)?;

    let mut header_payload = Vec::with_capacity(header.len() + MAC_LENGTH);
    header_payload.extend_from_slice(&header);
    header_payload.extend_from_slice(&mac);

    Ok(SampledKeys {
        decapsulation_key: keys.decapsulation_key.clone(),
        ek_vector: keys.ek_vector().to_vec(),
        header_payload,
    })
}

/// Проверить MAC header и вернуть сам header
pub(crate) fn open_header(epoch: u64, auth: &Authenticator, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() != kem::HEADER_LENGTH + MAC_LENGTH {
        return Err(Error::MsgDecode("header payload has wrong length"));
    }
    let (header, mac) = payload.split_at(kem::HEADER_LENGTH);
    auth.verify_hdr(epoch, header, mac)?;
    Ok(header.to_vec())
}

/// Шаг 1 инкапсуляции: ct1, состояние и секрет эпохи; аутентификатор обновляется
pub(crate) fn encapsulate_ct1<R: RngCore + CryptoRng>(
    epoch: u64,
    auth: &mut Authenticator,
    header: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, kem::EncapsulationState, EpochSecret)> {
    let (ct1, encapsulation_state, mut shared_secret) = kem::encaps1(header, rng)?;
    let epoch_secret = derive_epoch_secret(epoch, &shared_secret);
    shared_secret.zeroize();
    let epoch_secret = epoch_secret?;
    auth.update(epoch, &epoch_secret.secret)?;
    Ok((ct1, encapsulation_state, epoch_secret))
}

/// Шаг 2 инкапсуляции: ct2 ‖ mac(ct1 ‖ ct2)
pub(crate) fn encapsulate_ct2(
    epoch: u64,
    auth: &Authenticator,
    header: &[u8],
    encapsulation_state: &kem::EncapsulationState,
    ct1: &[u8],
    ek_vector: &[u8],
) -> Result<Vec<u8>> {
    let ct2 = kem::encaps2(encapsulation_state, header, ek_vector)?;
    let mut ciphertext = Vec::with_capacity(ct1.len() + ct2.len());
    ciphertext.extend_from_slice(ct1);
    ciphertext.extend_from_slice(&ct2);
    let mac = auth.mac_ct(epoch, &ciphertext)?;

    let mut payload = ct2;
    payload.extend_from_slice(&mac);
    Ok(payload)
}

/// Проверить, что полученный ek соответствует header
pub(crate) fn check_ek(header: &[u8], ek_vector: &[u8]) -> Result<()> {
    if !kem::ek_matches_header(header, ek_vector) {
        return Err(Error::EkHeaderMismatch);
    }
    Ok(())
}

/// Сторона send_ek: декапсуляция, обновление аутентификатора, проверка MAC
pub(crate) fn decapsulate_ct2(
    epoch: u64,
    auth: &mut Authenticator,
    decapsulation_key: &[u8],
    ct1: &[u8],
    ct2_payload: &[u8],
) -> Result<EpochSecret> {
    if ct2_payload.len() != kem::CT2_LENGTH + MAC_LENGTH {
        return Err(Error::MsgDecode("ct2 payload has wrong length"));
    }
    let (ct2, mac) = ct2_payload.split_at(kem::CT2_LENGTH);
    let mut ciphertext = Vec::with_capacity(kem::CIPHERTEXT_LENGTH);
    ciphertext.extend_from_slice(ct1);
    ciphertext.extend_from_slice(ct2);

    let mut shared_secret = kem::decapsulate(decapsulation_key, &ciphertext)?;
    let epoch_secret = derive_epoch_secret(epoch, &shared_secret);
    shared_secret.zeroize();
    let epoch_secret = epoch_secret?;

    auth.update(epoch, &epoch_secret.secret)?;
    auth.verify_ct(epoch, &ciphertext, mac)?;
    Ok(epoch_secret)
}
