//! Симметричные цепочки SPQR
//!
//! Для каждой эпохи хранятся две однонаправленные цепочки (A→B и B→A).
//! Эпоха 0 выводится из ключа аутентификации сессии, каждая следующая
//! добавляется секретом, полученным в результате обмена ML-KEM:
//!
//! ```text
//! Chain Start:      HKDF(0, auth_key)              → next_root ‖ ck_a2b ‖ ck_b2a
//! Chain Add Epoch:  HKDF(next_root, epoch_secret)   → next_root ‖ ck_a2b ‖ ck_b2a
//! Chain Next:       HKDF(ck, epoch ‖ index)         → ck' ‖ message_key
//! ```
//!
//! Индексы ключей начинаются с 1: индекс 0 в сообщении означает, что
//! отправитель ещё не использовал ключ SPQR. Хранятся ключи только
//! последних [`EPOCHS_TO_RETAIN`] эпох.

use std::collections::VecDeque;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{Error, Result};
use super::Direction;
use crate::config::Config;

pub const EPOCHS_TO_RETAIN: usize = 5;
pub const KEY_LENGTH: usize = 32;
pub const FIRST_KEY_INDEX: u32 = 1;

const CHAIN_START_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Start";
const CHAIN_ADD_EPOCH_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Add Epoch";
const CHAIN_NEXT_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Next";

/// Ограничения на получение ключей не по порядку
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Максимальный прыжок индекса вперёд внутри эпохи
    pub max_jump: u32,
    /// Сколько пропущенных ключей хранится на эпоху
    pub max_ooo_keys: u32,
}

impl ChainParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_jump: config.spqr_max_jump,
            max_ooo_keys: config.spqr_max_ooo_keys,
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::from_config(Config::global())
    }
}

/// Секрет, завершающий эпоху
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EpochSecret {
    pub epoch: u64,
    pub secret: [u8; KEY_LENGTH],
}

impl std::fmt::Debug for EpochSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochSecret")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct HalfChain {
    chain_key: [u8; KEY_LENGTH],
    next_index: u32,
    /// (index, key) пропущенных ключей, старые в начале
    skipped: VecDeque<(u32, [u8; KEY_LENGTH])>,
}

impl Drop for HalfChain {
    fn drop(&mut self) {
        self.chain_key.zeroize();
        for (_, key) in self.skipped.iter_mut() {
            key.zeroize();
        }
    }
}

impl HalfChain {
    fn new(chain_key: &[u8]) -> Self {
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(chain_key);
        Self {
            chain_key: key,
            next_index: FIRST_KEY_INDEX,
            skipped: VecDeque::new(),
        }
    }

    fn advance(&mut self, epoch: u64) -> Result<(u32, [u8; KEY_LENGTH])> {
        let index = self.next_index;
        let next_index = index
            .checked_add(1)
            .ok_or(Error::ChainExhausted { epoch })?;
        let mut info = Vec::with_capacity(CHAIN_NEXT_INFO.len() + 12);
        info.extend_from_slice(CHAIN_NEXT_INFO);
        info.extend_from_slice(&epoch.to_be_bytes());
        info.extend_from_slice(&index.to_be_bytes());

        let hkdf = Hkdf::<Sha256>::new(None, &self.chain_key);
        let mut okm = [0u8; 2 * KEY_LENGTH];
        hkdf.expand(&info, &mut okm)?;

        let mut key = [0u8; KEY_LENGTH];
        self.chain_key.copy_from_slice(&okm[..KEY_LENGTH]);
        key.copy_from_slice(&okm[KEY_LENGTH..]);
        okm.zeroize();

        self.next_index = next_index;
        Ok((index, key))
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct ChainEpoch {
    epoch: u64,
    send: HalfChain,
    recv: HalfChain,
}

/// Пара цепочек SPQR одной стороны сессии
#[derive(Clone, Serialize, Deserialize)]
pub struct Chain {
    direction: Direction,
    current_epoch: u64,
    send_epoch: u64,
    next_root: [u8; KEY_LENGTH],
    links: VecDeque<ChainEpoch>,
    params: ChainParams,
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.next_root.zeroize();
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("direction", &self.direction)
            .field("current_epoch", &self.current_epoch)
            .field("send_epoch", &self.send_epoch)
            .field("links", &self.links.len())
            .finish()
    }
}

/// Разбить 96 байт HKDF на (next_root, send, recv) с учётом направления
fn split_link(
    okm: &[u8; 3 * KEY_LENGTH],
    direction: Direction,
) -> ([u8; KEY_LENGTH], HalfChain, HalfChain) {
    let mut next_root = [0u8; KEY_LENGTH];
    next_root.copy_from_slice(&okm[..KEY_LENGTH]);
    let a2b = HalfChain::new(&okm[KEY_LENGTH..2 * KEY_LENGTH]);
    let b2a = HalfChain::new(&okm[2 * KEY_LENGTH..]);
    match direction {
        Direction::A2B => (next_root, a2b, b2a),
        Direction::B2A => (next_root, b2a, a2b),
    }
}

impl Chain {
    pub fn new(initial_key: &[u8], direction: Direction, params: ChainParams) -> Result<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; KEY_LENGTH]), initial_key);
        let mut okm = [0u8; 3 * KEY_LENGTH];
        hkdf.expand(CHAIN_START_INFO, &mut okm)?;
        let (next_root, send, recv) = split_link(&okm, direction);
        okm.zeroize();

        let mut links = VecDeque::with_capacity(EPOCHS_TO_RETAIN);
        links.push_back(ChainEpoch {
            epoch: 0,
            send,
            recv,
        });
        Ok(Self {
            direction,
            current_epoch: 0,
            send_epoch: 0,
            next_root,
            links,
            params,
        })
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn add_epoch(&mut self, epoch_secret: &EpochSecret) -> Result<()> {
        use tracing::debug;

        if epoch_secret.epoch != self.current_epoch + 1 {
            return Err(Error::EpochOutOfRange(epoch_secret.epoch));
        }

        let hkdf = Hkdf::<Sha256>::new(Some(&self.next_root), &epoch_secret.secret);
        let mut okm = [0u8; 3 * KEY_LENGTH];
        hkdf.expand(CHAIN_ADD_EPOCH_INFO, &mut okm)?;
        let (next_root, send, recv) = split_link(&okm, self.direction);
        okm.zeroize();

        self.next_root = next_root;
        self.current_epoch = epoch_secret.epoch;
        self.links.push_back(ChainEpoch {
            epoch: epoch_secret.epoch,
            send,
            recv,
        });
        while self.links.len() > EPOCHS_TO_RETAIN {
            self.links.pop_front();
        }

        debug!(
            target: "spqr::chain",
            epoch = epoch_secret.epoch,
            retained = self.links.len(),
            "Added chain epoch"
        );
        Ok(())
    }

    fn link_mut(&mut self, epoch: u64) -> Result<&mut ChainEpoch> {
        self.links
            .iter_mut()
            .find(|link| link.epoch == epoch)
            .ok_or(Error::EpochOutOfRange(epoch))
    }

    /// Следующий ключ отправки в эпохе `epoch`
    pub fn send_key(&mut self, epoch: u64) -> Result<(u32, [u8; KEY_LENGTH])> {
        if epoch < self.send_epoch {
            return Err(Error::SendKeyEpochDecreased {
                current: self.send_epoch,
                requested: epoch,
            });
        }
        let key = self.link_mut(epoch)?.send.advance(epoch)?;
        self.send_epoch = epoch;
        Ok(key)
    }

    /// Ключ получения для (epoch, index), каждый выдаётся не более одного раза
    pub fn recv_key(&mut self, epoch: u64, index: u32) -> Result<[u8; KEY_LENGTH]> {
        use tracing::trace;

        let params = self.params;
        let half = &mut self.link_mut(epoch)?.recv;

        if index < half.next_index {
            let position = half
                .skipped
                .iter()
                .position(|(skipped_index, _)| *skipped_index == index)
                .ok_or(Error::KeyAlreadyRequested { epoch, index })?;
            let (_, key) = half
                .skipped
                .remove(position)
                .ok_or(Error::KeyAlreadyRequested { epoch, index })?;
            return Ok(key);
        }

        if index - half.next_index > params.max_jump {
            return Err(Error::KeyJump {
                current: half.next_index,
                index,
            });
        }

        while half.next_index < index {
            let skipped = half.advance(epoch)?;
            half.skipped.push_back(skipped);
            if half.skipped.len() > params.max_ooo_keys as usize {
                half.skipped.pop_front();
            }
        }
        let (_, key) = half.advance(epoch)?;

        trace!(target: "spqr::chain", epoch, index, skipped = half.skipped.len(), "Derived receive key");
        Ok(key)
    }
}
