//! Централизованная конфигурация для construct-spqr
//!
//! Все лимиты протокола, которые можно настраивать, определены здесь.
//! Размеры, зафиксированные форматом (ML-KEM, wire), живут рядом с кодом.

use std::sync::OnceLock;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // КРИПТОГРАФИЧЕСКИЕ ПАРАМЕТРЫ
    // ============================================

    /// ID классического криптографического набора (Classic Suite)
    pub classic_suite_id: u16,

    // ============================================
    // DOUBLE RATCHET ПАРАМЕТРЫ
    // ============================================

    /// Максимальный прыжок счётчика вперёд в одной цепочке (DoS защита).
    /// Не применяется к сессии с самим собой.
    pub max_forward_jumps: u32,

    /// Максимальное количество receiver chains в одной сессии
    pub max_receiver_chains: usize,

    /// Максимальное количество сохранённых ключей пропущенных сообщений на цепочку
    pub max_message_keys: usize,

    /// Максимальное количество архивных состояний в SessionRecord
    pub archived_states_max_length: usize,

    /// Возраст неподтверждённой сессии, после которого она считается устаревшей (мс)
    /// По умолчанию: 30 дней
    pub max_unacknowledged_session_age_ms: u64,

    // ============================================
    // SPQR ПАРАМЕТРЫ
    // ============================================

    /// Максимальный прыжок индекса внутри эпохи SPQR chain
    pub spqr_max_jump: u32,

    /// Максимальное количество out-of-order ключей SPQR chain на эпоху
    pub spqr_max_ooo_keys: u32,
}

impl Config {
    /// Создать конфигурацию с дефолтными значениями
    pub fn default() -> Self {
        Self {
            // Криптография
            classic_suite_id: 1,

            // Double Ratchet
            max_forward_jumps: 25_000,
            max_receiver_chains: 5,
            max_message_keys: 2_000,
            archived_states_max_length: 40,
            max_unacknowledged_session_age_ms: 30 * 24 * 60 * 60 * 1000, // 30 days

            // SPQR
            spqr_max_jump: 25_000,
            spqr_max_ooo_keys: 2_000,
        }
    }

    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MAX_FORWARD_JUMPS") {
            if let Ok(parsed) = val.parse() {
                config.max_forward_jumps = parsed;
            }
        }

        if let Ok(val) = std::env::var("MAX_MESSAGE_KEYS") {
            if let Ok(parsed) = val.parse() {
                config.max_message_keys = parsed;
            }
        }

        if let Ok(val) = std::env::var("MAX_RECEIVER_CHAINS") {
            if let Ok(parsed) = val.parse() {
                config.max_receiver_chains = parsed;
            }
        }

        if let Ok(val) = std::env::var("ARCHIVED_STATES_MAX_LENGTH") {
            if let Ok(parsed) = val.parse() {
                config.archived_states_max_length = parsed;
            }
        }

        if let Ok(val) = std::env::var("SPQR_MAX_JUMP") {
            if let Ok(parsed) = val.parse() {
                config.spqr_max_jump = parsed;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }
}
