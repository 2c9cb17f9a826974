// Вспомогательные функции

pub mod serialization;
pub mod time;
