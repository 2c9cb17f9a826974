//! Машина состояний с передачей частей ML-KEM целиком

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use super::{
    check_ek, decapsulate_ct2, encapsulate_ct1, encapsulate_ct2, initial_authenticator,
    open_header, sample_keys, starts_as_key_owner, Received, Sent, StateMachine,
};
use crate::crypto::kem::EncapsulationState;
use crate::spqr::authenticator::Authenticator;
use crate::spqr::chain::EpochSecret;
use crate::spqr::error::Result;
use crate::spqr::message::Payload;
use crate::spqr::Direction;

// ============================================================================
// Сторона send_ek
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysUnsampled {
    pub epoch: u64,
    auth: Authenticator,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HeaderSent {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    decapsulation_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ek_vector: Vec<u8>,
    #[serde(with = "serde_bytes")]
    header_payload: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct1Received {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    decapsulation_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ek_vector: Vec<u8>,
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
    ek_vector: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
}

impl KeysUnsampled {
    pub fn new(epoch: u64, auth: Authenticator) -> Self {
        Self { epoch, auth }
    }

    pub fn send_header<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<(HeaderSent, Payload)> {
        let keys = sample_keys(self.epoch, &self.auth, rng)?;
        let payload = Payload::Hdr(keys.header_payload.clone());
        let next = HeaderSent {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: keys.decapsulation_key.clone(),
            ek_vector: keys.ek_vector.clone(),
            header_payload: keys.header_payload.clone(),
        };
        Ok((next, payload))
    }
}

impl HeaderSent {
    pub fn recv_ct1(self, ct1: &[u8]) -> Ct1Received {
        Ct1Received {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: self.decapsulation_key,
            ek_vector: self.ek_vector,
            ct1: ct1.to_vec(),
        }
    }
}

impl Ct1Received {
    pub fn send_ek(self) -> (EkSentCt1Received, Payload) {
        let payload = Payload::Ek(self.ek_vector.clone());
        let next = EkSentCt1Received {
            epoch: self.epoch,
            auth: self.auth,
            decapsulation_key: self.decapsulation_key,
            ek_vector: self.ek_vector,
            ct1: self.ct1,
        };
        (next, payload)
    }
}

impl EkSentCt1Received {
    pub fn recv_ct2(mut self, ct2_payload: &[u8]) -> Result<(NoHeaderReceived, EpochSecret)> {
        let epoch_secret = decapsulate_ct2(
            self.epoch,
            &mut self.auth,
            &self.decapsulation_key,
            &self.ct1,
            ct2_payload,
        )?;
        Ok((NoHeaderReceived::new(self.epoch + 1, self.auth), epoch_secret))
    }
}

// ============================================================================
// Сторона send_ct
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoHeaderReceived {
    pub epoch: u64,
    auth: Authenticator,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HeaderReceived {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct1Sent {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
    encapsulation_state: EncapsulationState,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct1SentEkReceived {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    header: Vec<u8>,
    encapsulation_state: EncapsulationState,
    #[serde(with = "serde_bytes")]
    ct1: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ek_vector: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ct2Sent {
    pub epoch: u64,
    auth: Authenticator,
    #[serde(with = "serde_bytes")]
    ct2_payload: Vec<u8>,
}

impl NoHeaderReceived {
    pub fn new(epoch: u64, auth: Authenticator) -> Self {
        Self { epoch, auth }
    }

    pub fn recv_header(self, header_payload: &[u8]) -> Result<HeaderReceived> {
        let header = open_header(self.epoch, &self.auth, header_payload)?;
        Ok(HeaderReceived {
            epoch: self.epoch,
            auth: self.auth,
            header,
        })
    }
}

impl HeaderReceived {
    pub fn send_ct1<R: RngCore + CryptoRng>(
        mut self,
        rng: &mut R,
    ) -> Result<(Ct1Sent, Payload, EpochSecret)> {
        let (ct1, encapsulation_state, epoch_secret) =
            encapsulate_ct1(self.epoch, &mut self.auth, &self.header, rng)?;
        let payload = Payload::Ct1(ct1.clone());
        let next = Ct1Sent {
            epoch: self.epoch,
            auth: self.auth,
            header: self.header,
            encapsulation_state,
            ct1,
        };
        Ok((next, payload, epoch_secret))
    }
}

impl Ct1Sent {
    pub fn recv_ek(self, ek_vector: &[u8]) -> Result<Ct1SentEkReceived> {
        check_ek(&self.header, ek_vector)?;
        Ok(Ct1SentEkReceived {
            epoch: self.epoch,
            auth: self.auth,
            header: self.header,
            encapsulation_state: self.encapsulation_state,
            ct1: self.ct1,
            ek_vector: ek_vector.to_vec(),
        })
    }
}

impl Ct1SentEkReceived {
    pub fn send_ct2(self) -> Result<(Ct2Sent, Payload)> {
        let ct2_payload = encapsulate_ct2(
            self.epoch,
            &self.auth,
            &self.header,
            &self.encapsulation_state,
            &self.ct1,
            &self.ek_vector,
        )?;
        let payload = Payload::Ct2(ct2_payload.clone());
        let next = Ct2Sent {
            epoch: self.epoch,
            auth: self.auth,
            ct2_payload,
        };
        Ok((next, payload))
    }
}

impl Ct2Sent {
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
    HeaderSent(HeaderSent),
    Ct1Received(Ct1Received),
    EkSentCt1Received(EkSentCt1Received),

    NoHeaderReceived(NoHeaderReceived),
    HeaderReceived(HeaderReceived),
    Ct1Sent(Ct1Sent),
    Ct1SentEkReceived(Ct1SentEkReceived),
    Ct2Sent(Ct2Sent),
}

impl States {
    pub fn name(&self) -> &'static str {
        match self {
            States::KeysUnsampled(_) => "KeysUnsampled",
            States::HeaderSent(_) => "HeaderSent",
            States::Ct1Received(_) => "Ct1Received",
            States::EkSentCt1Received(_) => "EkSentCt1Received",
            States::NoHeaderReceived(_) => "NoHeaderReceived",
            States::HeaderReceived(_) => "HeaderReceived",
            States::Ct1Sent(_) => "Ct1Sent",
            States::Ct1SentEkReceived(_) => "Ct1SentEkReceived",
            States::Ct2Sent(_) => "Ct2Sent",
        }
    }
}

impl StateMachine for States {
    fn init(direction: Direction, auth_key: &[u8]) -> Result<Self> {
        let auth = initial_authenticator(auth_key)?;
        Ok(if starts_as_key_owner(direction) {
            States::KeysUnsampled(KeysUnsampled::new(1, auth))
        } else {
            States::NoHeaderReceived(NoHeaderReceived::new(1, auth))
        })
    }

    fn epoch(&self) -> u64 {
        match self {
            States::KeysUnsampled(s) => s.epoch,
            States::HeaderSent(s) => s.epoch,
            States::Ct1Received(s) => s.epoch,
            States::EkSentCt1Received(s) => s.epoch,
            States::NoHeaderReceived(s) => s.epoch,
            States::HeaderReceived(s) => s.epoch,
            States::Ct1Sent(s) => s.epoch,
            States::Ct1SentEkReceived(s) => s.epoch,
            States::Ct2Sent(s) => s.epoch,
        }
    }

    fn awaiting_next_epoch(&self) -> bool {
        matches!(self, States::Ct2Sent(_))
    }

    fn into_next_epoch(self) -> Self {
        match self {
            States::Ct2Sent(s) => States::KeysUnsampled(s.next_epoch()),
            other => other,
        }
    }

    fn send<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<Sent<Self>> {
        let mut epoch_secret = None;
        let (state, payload) = match self {
            States::KeysUnsampled(s) => {
                let (next, payload) = s.send_header(rng)?;
                (States::HeaderSent(next), payload)
            }
            States::HeaderSent(s) => {
                let payload = Payload::Hdr(s.header_payload.clone());
                (States::HeaderSent(s), payload)
            }
            States::Ct1Received(s) => {
                let (next, payload) = s.send_ek();
                (States::EkSentCt1Received(next), payload)
            }
            States::EkSentCt1Received(s) => {
                let payload = Payload::Ek(s.ek_vector.clone());
                (States::EkSentCt1Received(s), payload)
            }
            States::NoHeaderReceived(s) => (States::NoHeaderReceived(s), Payload::None),
            States::HeaderReceived(s) => {
                let (next, payload, secret) = s.send_ct1(rng)?;
                epoch_secret = Some(secret);
                (States::Ct1Sent(next), payload)
            }
            States::Ct1Sent(s) => {
                let payload = Payload::Ct1(s.ct1.clone());
                (States::Ct1Sent(s), payload)
            }
            States::Ct1SentEkReceived(s) => {
                let (next, payload) = s.send_ct2()?;
                (States::Ct2Sent(next), payload)
            }
            States::Ct2Sent(s) => {
                let payload = Payload::Ct2(s.ct2_payload.clone());
                (States::Ct2Sent(s), payload)
            }
        };
        Ok(Sent {
            state,
            payload,
            epoch_secret,
        })
    }

    fn recv_current(self, payload: &Payload) -> Result<Received<Self>> {
        let received = match (self, payload) {
            (States::HeaderSent(s), Payload::Ct1(ct1)) => {
                Received::unchanged(States::Ct1Received(s.recv_ct1(ct1)))
            }
            (States::EkSentCt1Received(s), Payload::Ct2(ct2_payload)) => {
                let (next, secret) = s.recv_ct2(ct2_payload)?;
                Received {
                    state: States::NoHeaderReceived(next),
                    epoch_secret: Some(secret),
                }
            }
            (States::NoHeaderReceived(s), Payload::Hdr(header_payload)) => {
                Received::unchanged(States::HeaderReceived(s.recv_header(header_payload)?))
            }
            (States::Ct1Sent(s), Payload::Ek(ek_vector)) => {
                Received::unchanged(States::Ct1SentEkReceived(s.recv_ek(ek_vector)?))
            }
            // повторы уже обработанных частей
            (state, _) => Received::unchanged(state),
        };
        Ok(received)
    }
}
