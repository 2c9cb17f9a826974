//! Машина состояний с передачей частей ML-KEM чанками erasure-кода
//!
//! Каждое сообщение несёт не больше одного чанка. Потоки ek и ct1 идут
//! навстречу друг другу одновременно: получив первый чанк ct1, владелец
//! ключа начинает слать чанки ek, а после сборки ct1 помечает их как
//! `EkCt1Ack`, чтобы инкапсулятор мог прекратить отправку ct1.

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use super::{
    check_ek, decapsulate_ct2, encapsulate_ct1, encapsulate_ct2, initial_authenticator,
    open_header, sample_keys, starts_as_key_owner, Received, Sent, StateMachine,
};
use crate::crypto::kem::EncapsulationState;
use crate::spqr::authenticator::Authenticator;
use crate::spqr::chain::EpochSecret;
use crate::spqr::erasure::{Chunk, Decoder, Encoder};
use crate::spqr::error::{Error, Result};
use crate::spqr::message::{
    Payload, CT1_PAYLOAD_LENGTH, CT2_PAYLOAD_LENGTH, EK_PAYLOAD_LENGTH, HDR_PAYLOAD_LENGTH,
};
use crate::spqr::Direction;

fn decoded(decoder: &Decoder) -> Result<Vec<u8>> {
    decoder
        .decoded_message()
        .ok_or(Error::MsgDecode("incomplete chunk stream"))
}

// ============================================================================
// Сторона send_ek
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysUnsampled {
    pub epoch: u64,
    auth: Authenticator,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct KeysSampled {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    decapsulation_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ek_vector: Vec<u8>,
    header_encoder: Encoder,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HeaderSent {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    decapsulation_key: Vec<u8>,
    ek_encoder: Encoder,
    ct1_decoder: Decoder,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct1Received {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    decapsulation_key: Vec<u8>,
    ek_encoder: Encoder,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EkSentCt1Received {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    decapsulation_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
    ct2_decoder: Decoder,
}

impl KeysUnsampled {
    pub fn new(epoch: u64, auth: Authenticator) -> Self {
        Self { epoch, auth }
    }

    pub fn send_header<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<(KeysSampled, Chunk)> {
        let keys = sample_keys(self.epoch, &self.auth, rng)?;
        let mut header_encoder = Encoder::new(&keys.header_payload)?;
        let chunk = header_encoder.next_chunk();
        let next = KeysSampled {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: keys.decapsulation_key.clone(),
            ek_vector: keys.ek_vector.clone(),
            header_encoder,
        };
        Ok((next, chunk))
    }
}

/// Либо ct1 ещё собирается, либо уже собран
pub enum Ct1Progress {
    Collecting(HeaderSent),
    Complete(Ct1Received),
}

impl KeysSampled {
    pub fn send_header_chunk(&mut self) -> Chunk {
        self.header_encoder.next_chunk()
    }

    /// Первый чанк ct1 означает, что header доставлен
    pub fn recv_ct1_chunk(self, chunk: &Chunk) -> Result<Ct1Progress> {
        let next = HeaderSent {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: self.decapsulation_key,
            ek_encoder: Encoder::new(&self.ek_vector)?,
            ct1_decoder: Decoder::new(CT1_PAYLOAD_LENGTH)?,
        };
        next.recv_ct1_chunk(chunk)
    }
}

impl HeaderSent {
    pub fn send_ek_chunk(&mut self) -> Chunk {
        self.ek_encoder.next_chunk()
    }

    pub fn recv_ct1_chunk(mut self, chunk: &Chunk) -> Result<Ct1Progress> {
        self.ct1_decoder.add_chunk(chunk);
        if !self.ct1_decoder.is_complete() {
            return Ok(Ct1Progress::Collecting(self));
        }
        let ct1 = decoded(&self.ct1_decoder)?;
        Ok(Ct1Progress::Complete(Ct1Received {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: self.decapsulation_key,
            ek_encoder: self.ek_encoder,
            ct1,
        }))
    }
}

/// Либо ct2 ещё собирается, либо эпоха завершена
pub enum Ct2Progress {
    Collecting(EkSentCt1Received),
    Complete(NoHeaderReceived, EpochSecret),
}

impl Ct1Received {
    pub fn send_ek_ct1_ack_chunk(&mut self) -> Chunk {
        self.ek_encoder.next_chunk()
    }

    /// Первый чанк ct2 означает, что ek доставлен целиком
    pub fn recv_ct2_chunk(self, chunk: &Chunk) -> Result<Ct2Progress> {
        let next = EkSentCt1Received {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: self.decapsulation_key,
            ct1: self.ct1,
            ct2_decoder: Decoder::new(CT2_PAYLOAD_LENGTH)?,
        };
        next.recv_ct2_chunk(chunk)
    }
}

impl EkSentCt1Received {
    pub fn recv_ct2_chunk(mut self, chunk: &Chunk) -> Result<Ct2Progress> {
        self.ct2_decoder.add_chunk(chunk);
        if !self.ct2_decoder.is_complete() {
            return Ok(Ct2Progress::Collecting(self));
        }
        let ct2_payload = decoded(&self.ct2_decoder)?;
        let epoch_secret = decapsulate_ct2(
            self.epoch,
            &mut self.auth,
            &self.decapsulation_key,
            &self.ct1,
            &ct2_payload,
        )?;
        Ok(Ct2Progress::Complete(
            NoHeaderReceived::new(self.epoch + 1, self.auth)?,
            epoch_secret,
        ))
    }
}

// ============================================================================
// Сторона send_ct
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct NoHeaderReceived {
    pub epoch: u64,
    auth: Authenticator,
    header_decoder: Decoder,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HeaderReceived {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct1Sampled {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
    encapsulation_state: EncapsulationState,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
    ct1_encoder: Encoder,
    ek_decoder: Decoder,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EkReceivedCt1Sampled {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
    encapsulation_state: EncapsulationState,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
    ct1_encoder: Encoder,
    #[serde(with = "serde_bytes")]
    ek_vector: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct1Acknowledged {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
    encapsulation_state: EncapsulationState,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
    ek_decoder: Decoder,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct2Sampled {
    pub epoch: u64,
    auth: Authenticator,
    ct2_encoder: Encoder,
}

impl NoHeaderReceived {
    pub fn new(epoch: u64, auth: Authenticator) -> Result<Self> {
        Ok(Self {
            epoch,
            auth,
            header_decoder: Decoder::new(HDR_PAYLOAD_LENGTH)?,
        })
    }

    pub fn recv_header_chunk(mut self, chunk: &Chunk) -> Result<HeaderProgress> {
        self.header_decoder.add_chunk(chunk);
        if !self.header_decoder.is_complete() {
            return Ok(HeaderProgress::Collecting(self));
        }
        let header = open_header(self.epoch, &self.auth, &decoded(&self.header_decoder)?)?;
        Ok(HeaderProgress::Complete(HeaderReceived {
            epoch: self.epoch,
            auth: self.auth,
            header,
        }))
    }
}

pub enum HeaderProgress {
    Collecting(NoHeaderReceived),
    Complete(HeaderReceived),
}

impl HeaderReceived {
    pub fn send_ct1_chunk<R: RngCore + CryptoRng>(
        mut self,
        rng: &mut R,
    ) -> Result<(Ct1Sampled, Chunk, EpochSecret)> {
        let (ct1, encapsulation_state, epoch_secret) =
            encapsulate_ct1(self.epoch, &mut self.auth, &self.header, rng)?;
        let mut ct1_encoder = Encoder::new(&ct1)?;
        let chunk = ct1_encoder.next_chunk();
        let next = Ct1Sampled {
            epoch: self.epoch,
            auth: self.auth,
            header: self.header,
            encapsulation_state,
            ct1,
            ct1_encoder,
            ek_decoder: Decoder::new(EK_PAYLOAD_LENGTH)?,
        };
        Ok((next, chunk, epoch_secret))
    }
}

/// Куда перешла сторона send_ct после чанка ek
pub enum EkProgress {
    Collecting(Ct1Sampled),
    CollectingAcknowledged(Ct1Acknowledged),
    Received(EkReceivedCt1Sampled),
    Encapsulated(Ct2Sampled),
}

impl Ct1Sampled {
    pub fn send_ct1_chunk(&mut self) -> Chunk {
        self.ct1_encoder.next_chunk()
    }

    pub fn recv_ek_chunk(mut self, chunk: &Chunk, ct1_acknowledged: bool) -> Result<EkProgress> {
        self.ek_decoder.add_chunk(chunk);
        if self.ek_decoder.is_complete() {
            let ek_vector = decoded(&self.ek_decoder)?;
            check_ek(&self.header, &ek_vector)?;
            let received = EkReceivedCt1Sampled {
                epoch: self.epoch,
                auth: self.auth,
                header: self.header,
                encapsulation_state: self.encapsulation_state,
                ct1: self.ct1,
                ct1_encoder: self.ct1_encoder,
                ek_vector,
            };
            return if ct1_acknowledged {
                Ok(EkProgress::Encapsulated(received.send_ct2()?))
            } else {
                Ok(EkProgress::Received(received))
            };
        }

        if ct1_acknowledged {
            return Ok(EkProgress::CollectingAcknowledged(Ct1Acknowledged {
                epoch: self.epoch,
                auth: self.auth,
                header: self.header,
                encapsulation_state: self.encapsulation_state,
                ct1: self.ct1,
                ek_decoder: self.ek_decoder,
            }));
        }
        Ok(EkProgress::Collecting(self))
    }
}

impl EkReceivedCt1Sampled {
    pub fn send_ct1_chunk(&mut self) -> Chunk {
        self.ct1_encoder.next_chunk()
    }

    pub fn send_ct2(self) -> Result<Ct2Sampled> {
        let ct2_payload = encapsulate_ct2(
            self.epoch,
            &self.auth,
            &self.header,
            &self.encapsulation_state,
            &self.ct1,
            &self.ek_vector,
        )?;
        Ok(Ct2Sampled {
            epoch: self.epoch,
            auth: self.auth,
            ct2_encoder: Encoder::new(&ct2_payload)?,
        })
    }
}

pub enum AcknowledgedProgress {
    Collecting(Ct1Acknowledged),
    Encapsulated(Ct2Sampled),
}

impl Ct1Acknowledged {
    pub fn recv_ek_chunk(mut self, chunk: &Chunk) -> Result<AcknowledgedProgress> {
        self.ek_decoder.add_chunk(chunk);
        if !self.ek_decoder.is_complete() {
            return Ok(AcknowledgedProgress::Collecting(self));
        }
        let ek_vector = decoded(&self.ek_decoder)?;
        check_ek(&self.header, &ek_vector)?;
        let ct2_payload = encapsulate_ct2(
            self.epoch,
            &self.auth,
            &self.header,
            &self.encapsulation_state,
            &self.ct1,
            &ek_vector,
        )?;
        Ok(AcknowledgedProgress::Encapsulated(Ct2Sampled {
            epoch: self.epoch,
            auth: self.auth,
            ct2_encoder: Encoder::new(&ct2_payload)?,
        }))
    }
}

impl Ct2Sampled {
    pub fn send_ct2_chunk(&mut self) -> Chunk {
        self.ct2_encoder.next_chunk()
    }

    pub fn next_epoch(self) -> KeysUnsampled {
        KeysUnsampled::new(self.epoch + 1, self.auth)
    }
}

// ============================================================================
// Объединение состояний
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub enum States {
    KeysUnsampled(KeysUnsampled),
    KeysSampled(KeysSampled),
    HeaderSent(HeaderSent),
    Ct1Received(Ct1Received),
    EkSentCt1Received(EkSentCt1Received),

    NoHeaderReceived(NoHeaderReceived),
    HeaderReceived(HeaderReceived),
    Ct1Sampled(Ct1Sampled),
    EkReceivedCt1Sampled(EkReceivedCt1Sampled),
    Ct1Acknowledged(Ct1Acknowledged),
    Ct2Sampled(Ct2Sampled),
}

impl From<Ct1Progress> for States {
    fn from(progress: Ct1Progress) -> Self {
        match progress {
            Ct1Progress::Collecting(s) => States::HeaderSent(s),
            Ct1Progress::Complete(s) => States::Ct1Received(s),
        }
    }
}

impl From<EkProgress> for States {
    fn from(progress: EkProgress) -> Self {
        match progress {
            EkProgress::Collecting(s) => States::Ct1Sampled(s),
            EkProgress::CollectingAcknowledged(s) => States::Ct1Acknowledged(s),
            EkProgress::Received(s) => States::EkReceivedCt1Sampled(s),
            EkProgress::Encapsulated(s) => States::Ct2Sampled(s),
        }
    }
}

impl From<AcknowledgedProgress> for States {
    fn from(progress: AcknowledgedProgress) -> Self {
        match progress {
            AcknowledgedProgress::Collecting(s) => States::Ct1Acknowledged(s),
            AcknowledgedProgress::Encapsulated(s) => States::Ct2Sampled(s),
        }
    }
}

impl From<HeaderProgress> for States {
    fn from(progress: HeaderProgress) -> Self {
        match progress {
            HeaderProgress::Collecting(s) => States::NoHeaderReceived(s),
            HeaderProgress::Complete(s) => States::HeaderReceived(s),
        }
    }
}

impl States {
    pub fn name(&self) -> &'static str {
        match self {
            States::KeysUnsampled(_) => "KeysUnsampled",
            States::KeysSampled(_) => "KeysSampled",
            States::HeaderSent(_) => "HeaderSent",
            States::Ct1Received(_) => "Ct1Received",
            States::EkSentCt1Received(_) => "EkSentCt1Received",
            States::NoHeaderReceived(_) => "NoHeaderReceived",
            States::HeaderReceived(_) => "HeaderReceived",
            States::Ct1Sampled(_) => "Ct1Sampled",
            States::EkReceivedCt1Sampled(_) => "EkReceivedCt1Sampled",
            States::Ct1Acknowledged(_) => "Ct1Acknowledged",
            States::Ct2Sampled(_) => "Ct2Sampled",
        }
    }

    fn from_ct2_progress(progress: Ct2Progress) -> Received<Self> {
        match progress {
            Ct2Progress::Collecting(s) => Received::unchanged(States::EkSentCt1Received(s)),
            Ct2Progress::Complete(s, secret) => Received {
                state: States::NoHeaderReceived(s),
                epoch_secret: Some(secret),
            },
        }
    }
}

impl StateMachine for States {
    fn init(direction: Direction, auth_key: &[u8]) -> Result<Self> {
        let auth = initial_authenticator(auth_key)?;
        Ok(if starts_as_key_owner(direction) {
            States::KeysUnsampled(KeysUnsampled::new(1, auth))
        } else {
            States::NoHeaderReceived(NoHeaderReceived::new(1, auth)?)
        })
    }

    fn epoch(&self) -> u64 {
        match self {
            States::KeysUnsampled(s) => s.epoch,
            States::KeysSampled(s) => s.epoch,
            States::HeaderSent(s) => s.epoch,
            States::Ct1Received(s) => s.epoch,
            States::EkSentCt1Received(s) => s.epoch,
            States::NoHeaderReceived(s) => s.epoch,
            States::HeaderReceived(s) => s.epoch,
            States::Ct1Sampled(s) => s.epoch,
            States::EkReceivedCt1Sampled(s) => s.epoch,
            States::Ct1Acknowledged(s) => s.epoch,
            States::Ct2Sampled(s) => s.epoch,
        }
    }

    fn awaiting_next_epoch(&self) -> bool {
        matches!(self, States::Ct2Sampled(_))
    }

    fn into_next_epoch(self) -> Self {
        match self {
            States::Ct2Sampled(s) => States::KeysUnsampled(s.next_epoch()),
            other => other,
        }
    }

    fn send<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<Sent<Self>> {
        let mut epoch_secret = None;
        let (state, payload) = match self {
            States::KeysUnsampled(s) => {
                let (next, chunk) = s.send_header(rng)?;
                (States::KeysSampled(next), Payload::HdrChunk(chunk))
            }
            States::KeysSampled(mut s) => {
                let chunk = s.send_header_chunk();
                (States::KeysSampled(s), Payload::HdrChunk(chunk))
            }
            States::HeaderSent(mut s) => {
                let chunk = s.send_ek_chunk();
                (States::HeaderSent(s), Payload::EkChunk(chunk))
            }
            States::Ct1Received(mut s) => {
                let chunk = s.send_ek_ct1_ack_chunk();
                (States::Ct1Received(s), Payload::EkCt1AckChunk(chunk))
            }
            States::EkSentCt1Received(s) => (States::EkSentCt1Received(s), Payload::Ct1Ack(true)),
            States::NoHeaderReceived(s) => (States::NoHeaderReceived(s), Payload::None),
            States::HeaderReceived(s) => {
                let (next, chunk, secret) = s.send_ct1_chunk(rng)?;
                epoch_secret = Some(secret);
                (States::Ct1Sampled(next), Payload::Ct1Chunk(chunk))
            }
            States::Ct1Sampled(mut s) => {
                let chunk = s.send_ct1_chunk();
                (States::Ct1Sampled(s), Payload::Ct1Chunk(chunk))
            }
            States::EkReceivedCt1Sampled(mut s) => {
                let chunk = s.send_ct1_chunk();
                (States::EkReceivedCt1Sampled(s), Payload::Ct1Chunk(chunk))
            }
            States::Ct1Acknowledged(s) => (States::Ct1Acknowledged(s), Payload::None),
            States::Ct2Sampled(mut s) => {
                let chunk = s.send_ct2_chunk();
                (States::Ct2Sampled(s), Payload::Ct2Chunk(chunk))
            }
        };
        Ok(Sent {
            state,
            payload,
            epoch_secret,
        })
    }

    fn recv_current(self, payload: &Payload) -> Result<Received<Self>> {
        let state = match (self, payload) {
            (States::KeysSampled(s), Payload::Ct1Chunk(chunk)) => s.recv_ct1_chunk(chunk)?.into(),
            (States::HeaderSent(s), Payload::Ct1Chunk(chunk)) => s.recv_ct1_chunk(chunk)?.into(),
            (States::Ct1Received(s), Payload::Ct2Chunk(chunk)) => {
                return Ok(Self::from_ct2_progress(s.recv_ct2_chunk(chunk)?));
            }
            (States::EkSentCt1Received(s), Payload::Ct2Chunk(chunk)) => {
                return Ok(Self::from_ct2_progress(s.recv_ct2_chunk(chunk)?));
            }

            (States::NoHeaderReceived(s), Payload::HdrChunk(chunk)) => {
                s.recv_header_chunk(chunk)?.into()
            }
            (States::Ct1Sampled(s), Payload::EkChunk(chunk)) => {
                s.recv_ek_chunk(chunk, false)?.into()
            }
            (States::Ct1Sampled(s), Payload::EkCt1AckChunk(chunk)) => {
                s.recv_ek_chunk(chunk, true)?.into()
            }
            (States::EkReceivedCt1Sampled(s), Payload::EkCt1AckChunk(_))
            | (States::EkReceivedCt1Sampled(s), Payload::Ct1Ack(true)) => {
                States::Ct2Sampled(s.send_ct2()?)
            }
            (States::Ct1Acknowledged(s), Payload::EkChunk(chunk))
            | (States::Ct1Acknowledged(s), Payload::EkCt1AckChunk(chunk)) => {
                s.recv_ek_chunk(chunk)?.into()
            }
            // повторы и payload, уже не нужные в текущем состоянии
            (state, _) => state,
        };
        Ok(Received::unchanged(state))
    }
}
