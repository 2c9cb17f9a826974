// Время в миллисекундах Unix epoch

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Миллисекунды с начала Unix epoch; время до epoch считается нулём
pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_roundtrip() {
        let time = from_millis(1_700_000_000_123);
        assert_eq!(millis_since_epoch(time), 1_700_000_000_123);
        assert_eq!(millis_since_epoch(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }
}
