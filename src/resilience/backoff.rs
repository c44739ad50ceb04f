//! Exponential backoff with jitter for redialing backends.

use std::time::Duration;

use rand::Rng;

use crate::config::InspectorConfig;

/// Delay schedule for a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub fn new(attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            attempts,
            base_ms,
            max_ms,
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }
}

impl From<&InspectorConfig> for Backoff {
    fn from(config: &InspectorConfig) -> Self {
        Self::new(
            config.connect_attempts,
            config.connect_base_delay_ms,
            config.connect_max_delay_ms,
        )
    }
}

/// Calculate exponential backoff delay with up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);
        assert!(calculate_backoff(1, 100, 2000).as_millis() >= 100);
        assert!(calculate_backoff(2, 100, 2000).as_millis() >= 200);

        let capped = calculate_backoff(10, 100, 1000).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn test_from_inspector_config() {
        let backoff = Backoff::from(&InspectorConfig::default());
        assert_eq!(backoff, Backoff::new(5, 100, 2000));
    }
}
