//! HMAC-аутентификатор сообщений SPQR
//!
//! Каждый header и ciphertext эпохи подписывается `mac_key`, производным
//! от цепочки `root_key`. При появлении секрета новой эпохи ключи
//! "перекатываются" через [`Authenticator::update`]; старое значение
//! после этого недоступно, поэтому для проверки исторических тегов
//! нужно клонировать аутентификатор до обновления.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{Error, Result};

pub const MAC_LENGTH: usize = 32;

const UPDATE_INFO: &[u8] = b"Signal_PQCKA_V1_MLKEM768:Authenticator Update";
const HEADER_LABEL: &[u8] = b"Signal_PQCKA_V1_MLKEM768:ekheader";
const CIPHERTEXT_LABEL: &[u8] = b"Signal_PQCKA_V1_MLKEM768:ciphertext";

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Authenticator {
    root_key: [u8; 32],
    mac_key: [u8; 32],
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Authenticator([REDACTED])")
    }
}

impl Authenticator {
    pub fn new(key: &[u8], epoch: u64) -> Result<Self> {
        let mut authenticator = Self {
            root_key: [0u8; 32],
            mac_key: [0u8; 32],
        };
        authenticator.update(epoch, key)?;
        Ok(authenticator)
    }

    /// Перекатить ключи секретом эпохи `epoch`
    pub fn update(&mut self, epoch: u64, key: &[u8]) -> Result<()> {
        let mut info = Vec::with_capacity(UPDATE_INFO.len() + 8);
        info.extend_from_slice(UPDATE_INFO);
        info.extend_from_slice(&epoch.to_be_bytes());

        let hkdf = Hkdf::<Sha256>::new(Some(&self.root_key), key);
        let mut okm = [0u8; 64];
        hkdf.expand(&info, &mut okm)?;

        self.root_key.copy_from_slice(&okm[..32]);
        self.mac_key.copy_from_slice(&okm[32..]);
        okm.zeroize();
        Ok(())
    }

    fn mac(&self, label: &[u8], epoch: u64, data: &[u8]) -> Result<[u8; MAC_LENGTH]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.mac_key)?;
        mac.update(label);
        mac.update(&epoch.to_be_bytes());
        mac.update(data);
        let mut out = [0u8; MAC_LENGTH];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn verify(&self, label: &[u8], epoch: u64, data: &[u8], expected: &[u8]) -> Result<()> {
        let computed = self.mac(label, epoch, data)?;
        if expected.len() != MAC_LENGTH || !bool::from(computed[..].ct_eq(expected)) {
            return Err(Error::MacVerificationFailed(epoch));
        }
        Ok(())
    }

    pub fn mac_hdr(&self, epoch: u64, header: &[u8]) -> Result<[u8; MAC_LENGTH]> {
        self.mac(HEADER_LABEL, epoch, header)
    }

    pub fn mac_ct(&self, epoch: u64, ciphertext: &[u8]) -> Result<[u8; MAC_LENGTH]> {
        self.mac(CIPHERTEXT_LABEL, epoch, ciphertext)
    }

    pub fn verify_hdr(&self, epoch: u64, header: &[u8], mac: &[u8]) -> Result<()> {
        self.verify(HEADER_LABEL, epoch, header, mac)
    }

    pub fn verify_ct(&self, epoch: u64, ciphertext: &[u8], mac: &[u8]) -> Result<()> {
        self.verify(CIPHERTEXT_LABEL, epoch, ciphertext, mac)
    }
}
