// Сериализация непрозрачных состояний (bincode)
//
// Записи сессий и prekey используют protobuf-совместимый кодек
// (`protocol::codec`); bincode нужен только для внутренних blob-ов,
// формат которых не выходит за пределы этой библиотеки.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}
