//! Хранилища ключей и сессий
//!
//! Ядро протокола требует только эти интерфейсы; способ хранения
//! определяет приложение. [`memory::InMemoryProtocolStore`] держит записи
//! сериализованными через wire-кодек и используется в тестах.
//!
//! Все вызовы синхронные. Доступ к одной сессии сериализует вызывающий код
//! (например, один lock на адрес).

pub mod memory;
pub mod models;

pub use memory::InMemoryProtocolStore;
pub use models::{
    Direction, IdentityChange, KyberPreKeyRecord, PreKeyRecord, ProtocolAddress,
    SignedPreKeyRecord,
};

use crate::crypto::keys::{IdentityKey, IdentityKeyPair};
use crate::crypto::messaging::SessionRecord;
use crate::error::Result;

pub trait IdentityKeyStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;

    fn get_local_registration_id(&self) -> Result<u32>;

    /// Запомнить identity собеседника
    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<IdentityChange>;

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool>;

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>>;
}

pub trait PreKeyStore {
    /// Ошибка [`ProtocolError::InvalidPreKeyId`](crate::error::ProtocolError::InvalidPreKeyId), если ключа нет
    fn get_pre_key(&self, pre_key_id: u32) -> Result<PreKeyRecord>;

    fn save_pre_key(&mut self, pre_key_id: u32, record: &PreKeyRecord) -> Result<()>;

    fn remove_pre_key(&mut self, pre_key_id: u32) -> Result<()>;
}

pub trait SignedPreKeyStore {
    fn get_signed_pre_key(&self, signed_pre_key_id: u32) -> Result<SignedPreKeyRecord>;

    fn save_signed_pre_key(
        &mut self,
        signed_pre_key_id: u32,
        record: &SignedPreKeyRecord,
    ) -> Result<()>;
}

pub trait KyberPreKeyStore {
    fn get_kyber_pre_key(&self, kyber_pre_key_id: u32) -> Result<KyberPreKeyRecord>;

    fn save_kyber_pre_key(
        &mut self,
        kyber_pre_key_id: u32,
        record: &KyberPreKeyRecord,
    ) -> Result<()>;

    /// Kyber prekey использован в успешно расшифрованном сообщении
    fn mark_kyber_pre_key_used(&mut self, kyber_pre_key_id: u32) -> Result<()>;
}

pub trait SessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;
}

/// Все хранилища, нужные одной стороне протокола
pub trait ProtocolStore:
    SessionStore + PreKeyStore + SignedPreKeyStore + KyberPreKeyStore + IdentityKeyStore
{
}

impl<T> ProtocolStore for T where
    T: SessionStore + PreKeyStore + SignedPreKeyStore + KyberPreKeyStore + IdentityKeyStore
{
}
