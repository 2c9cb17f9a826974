//! SPQR: Sparse Post-Quantum Ratchet
//!
//! Вспомогательный ratchet, который постепенно подмешивает секреты
//! ML-KEM-768 в симметричный ratchet сессии. Состояние непрозрачно для
//! вызывающего кода и передаётся как байты:
//!
//! ```text
//!            ┌──────────────────────────────┐
//!  state ──▶ │ send(state, rng)             │ ──▶ state', msg, key
//!            └──────────────────────────────┘
//!            ┌──────────────────────────────┐
//!  state ──▶ │ recv(state, msg)             │ ──▶ state', key
//!            └──────────────────────────────┘
//! ```
//!
//! Пустое состояние означает V0 (SPQR выключен): `send` возвращает пустое
//! сообщение без ключа, `recv` ничего не делает.
//!
//! ## Согласование версии
//!
//! Сторона с V1 остаётся в режиме согласования, пока не получит первое
//! сообщение V1. Пустое сообщение от собеседника в этот момент означает,
//! что он не поддерживает SPQR: при `min_version = V0` состояние
//! сбрасывается в V0, иначе это ошибка [`Error::MinimumVersion`].
//!
//! Пока согласование не завершено, сообщения уходят с индексом 0 и без
//! ключа: собеседник с V0 не смог бы вывести тот же ключ.

pub mod authenticator;
pub mod chain;
pub mod erasure;
pub mod error;
pub mod message;
pub mod v1;

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

pub use chain::{ChainParams, EpochSecret};
pub use error::{Error, Result};

use chain::Chain;
use message::Message;
use v1::StateMachine;

use crate::utils::serialization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Version {
    /// Без post-quantum ratchet
    V0,
    V1,
}

/// Направление цепочки: инициатор сессии всегда A2B
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    A2B,
    B2A,
}

/// Форма передачи частей ML-KEM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Chunking {
    Unchunked,
    #[default]
    Chunked,
}

#[derive(Debug, Clone)]
pub struct Params<'a> {
    pub direction: Direction,
    pub version: Version,
    pub min_version: Version,
    pub auth_key: &'a [u8],
    pub chain_params: ChainParams,
    pub chunking: Chunking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Send {
    pub state: Vec<u8>,
    pub msg: Vec<u8>,
    pub key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recv {
    pub state: Vec<u8>,
    pub key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentVersion {
    StillNegotiating {
        version: Version,
        min_version: Version,
    },
    NegotiationComplete(Version),
}

#[derive(Clone, Serialize, Deserialize)]
enum Machine {
    Unchunked(v1::unchunked::States),
    Chunked(v1::chunked::States),
}

impl Machine {
    fn init(params: &Params<'_>) -> Result<Self> {
        Ok(match params.chunking {
            Chunking::Unchunked => {
                Machine::Unchunked(v1::unchunked::States::init(params.direction, params.auth_key)?)
            }
            Chunking::Chunked => {
                Machine::Chunked(v1::chunked::States::init(params.direction, params.auth_key)?)
            }
        })
    }

    fn epoch(&self) -> u64 {
        match self {
            Machine::Unchunked(s) => s.epoch(),
            Machine::Chunked(s) => s.epoch(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Machine::Unchunked(s) => s.name(),
            Machine::Chunked(s) => s.name(),
        }
    }

    fn send<R: RngCore + CryptoRng>(
        self,
        rng: &mut R,
    ) -> Result<(Self, message::Payload, Option<EpochSecret>)> {
        Ok(match self {
            Machine::Unchunked(s) => {
                let sent = s.send(rng)?;
                (Machine::Unchunked(sent.state), sent.payload, sent.epoch_secret)
            }
            Machine::Chunked(s) => {
                let sent = s.send(rng)?;
                (Machine::Chunked(sent.state), sent.payload, sent.epoch_secret)
            }
        })
    }

    fn recv(self, msg: &Message) -> Result<(Self, Option<EpochSecret>)> {
        Ok(match self {
            Machine::Unchunked(s) => {
                let received = s.recv(msg)?;
                (Machine::Unchunked(received.state), received.epoch_secret)
            }
            Machine::Chunked(s) => {
                let received = s.recv(msg)?;
                (Machine::Chunked(received.state), received.epoch_secret)
            }
        })
    }
}

/// Сериализуемое состояние V1
#[derive(Clone, Serialize, Deserialize)]
struct PqRatchetState {
    /// `Some(min_version)`, пока не получено ни одного сообщения V1
    negotiating: Option<Version>,
    chain: Chain,
    machine: Machine,
}

impl PqRatchetState {
    fn decode(bytes: &[u8]) -> Result<Self> {
        serialization::from_bytes(bytes).map_err(|e| Error::StateDecode(e.to_string()))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serialization::to_bytes(self).map_err(|e| Error::StateDecode(e.to_string()))
    }

    /// Эпоха цепочки, ключи которой используются в текущей эпохе протокола
    fn key_epoch(message_epoch: u64) -> u64 {
        message_epoch - 1
    }
}

/// Начальное состояние; для V0 это пустые байты
pub fn initial_state(params: Params<'_>) -> Result<Vec<u8>> {
    use tracing::debug;

    if params.version == Version::V0 {
        return Ok(Vec::new());
    }

    let state = PqRatchetState {
        negotiating: Some(params.min_version),
        chain: Chain::new(params.auth_key, params.direction, params.chain_params)?,
        machine: Machine::init(&params)?,
    };

    debug!(
        target: "spqr::state",
        direction = ?params.direction,
        min_version = ?params.min_version,
        chunking = ?params.chunking,
        "Initialized SPQR state"
    );
    state.encode()
}

pub fn send<R: RngCore + CryptoRng>(state: &[u8], rng: &mut R) -> Result<Send> {
    use tracing::trace;

    if state.is_empty() {
        return Ok(Send {
            state: Vec::new(),
            msg: Vec::new(),
            key: None,
        });
    }

    let PqRatchetState {
        negotiating,
        mut chain,
        machine,
    } = PqRatchetState::decode(state)?;

    let (machine, payload, epoch_secret) = machine.send(rng)?;
    if let Some(epoch_secret) = epoch_secret {
        chain.add_epoch(&epoch_secret)?;
    }

    let epoch = machine.epoch();
    let (index, key) = if negotiating.is_some() {
        (0, None)
    } else {
        let (index, key) = chain.send_key(PqRatchetState::key_epoch(epoch))?;
        (index, Some(key.to_vec()))
    };
    let msg = Message {
        epoch,
        index,
        payload,
    }
    .encode();

    trace!(target: "spqr::state", epoch, index, state = machine.name(), "SPQR send");

    let next = PqRatchetState {
        negotiating,
        chain,
        machine,
    };
    Ok(Send {
        state: next.encode()?,
        msg,
        key,
    })
}

pub fn recv(state: &[u8], msg: &[u8]) -> Result<Recv> {
    use tracing::{debug, trace};

    if state.is_empty() {
        return Ok(Recv {
            state: Vec::new(),
            key: None,
        });
    }

    let PqRatchetState {
        negotiating,
        mut chain,
        machine,
    } = PqRatchetState::decode(state)?;

    if msg.is_empty() {
        return match negotiating {
            Some(Version::V0) => {
                debug!(target: "spqr::state", "Peer does not support SPQR, downgrading to V0");
                Ok(Recv {
                    state: Vec::new(),
                    key: None,
                })
            }
            _ => Err(Error::MinimumVersion),
        };
    }

    let message = Message::decode(msg)?;
    let (machine, epoch_secret) = machine.recv(&message)?;
    if let Some(epoch_secret) = epoch_secret {
        chain.add_epoch(&epoch_secret)?;
    }
    let key = match message.index {
        0 => None,
        index => Some(
            chain
                .recv_key(PqRatchetState::key_epoch(message.epoch), index)?
                .to_vec(),
        ),
    };

    if negotiating.is_some() {
        debug!(target: "spqr::state", epoch = message.epoch, "SPQR version negotiation complete");
    }
    trace!(
        target: "spqr::state",
        epoch = message.epoch,
        index = message.index,
        state = machine.name(),
        "SPQR recv"
    );

    let next = PqRatchetState {
        negotiating: None,
        chain,
        machine,
    };
    Ok(Recv {
        state: next.encode()?,
        key,
    })
}

pub fn current_version(state: &[u8]) -> Result<CurrentVersion> {
    if state.is_empty() {
        return Ok(CurrentVersion::NegotiationComplete(Version::V0));
    }
    let state = PqRatchetState::decode(state)?;
    Ok(match state.negotiating {
        Some(min_version) => CurrentVersion::StillNegotiating {
            version: Version::V1,
            min_version,
        },
        None => CurrentVersion::NegotiationComplete(Version::V1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(direction: Direction, min_version: Version) -> Params<'static> {
        Params {
            direction,
            version: Version::V1,
            min_version,
            auth_key: &[9u8; 32],
            chain_params: ChainParams {
                max_jump: 25_000,
                max_ooo_keys: 2_000,
            },
            chunking: Chunking::Unchunked,
        }
    }

    #[test]
    fn test_v0_state_is_empty_and_inert() {
        let mut rng = StdRng::seed_from_u64(1);
        let state = initial_state(Params {
            version: Version::V0,
            ..params(Direction::A2B, Version::V0)
        })
        .unwrap();
        assert!(state.is_empty());

        let sent = send(&state, &mut rng).unwrap();
        assert!(sent.msg.is_empty());
        assert!(sent.key.is_none());
        let received = recv(&state, b"anything").unwrap();
        assert!(received.state.is_empty());
        assert_eq!(
            current_version(&state).unwrap(),
            CurrentVersion::NegotiationComplete(Version::V0)
        );
    }

    #[test]
    fn test_negotiation_completes_on_first_v1_message() {
        let mut rng = StdRng::seed_from_u64(2);
        let alice = initial_state(params(Direction::A2B, Version::V0)).unwrap();
        let bob = initial_state(params(Direction::B2A, Version::V0)).unwrap();
        assert_eq!(
            current_version(&bob).unwrap(),
            CurrentVersion::StillNegotiating {
                version: Version::V1,
                min_version: Version::V0
            }
        );

        let sent = send(&alice, &mut rng).unwrap();
        assert!(sent.key.is_none());
        let received = recv(&bob, &sent.msg).unwrap();
        assert!(received.key.is_none());
        assert_eq!(
            current_version(&received.state).unwrap(),
            CurrentVersion::NegotiationComplete(Version::V1)
        );

        let reply = send(&received.state, &mut rng).unwrap();
        assert!(reply.key.is_some());
        let alice = recv(&sent.state, &reply.msg).unwrap();
        assert_eq!(alice.key, reply.key);

        // после завершения пустое сообщение недопустимо
        assert_eq!(recv(&alice.state, &[]), Err(Error::MinimumVersion));
    }

    #[test]
    fn test_corrupt_state_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(send(&[1, 2, 3], &mut rng), Err(Error::StateDecode(_))));
    }
}
