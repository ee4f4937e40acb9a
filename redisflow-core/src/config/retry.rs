use serde::{Deserialize, Serialize};

use crate::engine::retry::Exponential;

const DEFAULT_MAX_RETRY_ATTEMPTS: u16 = 3;
const DEFAULT_INITIAL_RETRY_INTERVAL_IN_MS: u32 = 100;
const DEFAULT_MAX_RETRY_INTERVAL_IN_MS: u32 = 5_000;
const DEFAULT_RETRY_FACTOR: f64 = 2.0;
const DEFAULT_RETRY_JITTER: f64 = 0.1;

/// Retry policy the runner applies to failed writes (per element) and lost connections (per
/// bundle). The sink itself never retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_retry_attempts: u16,
    pub initial_retry_interval_in_ms: u32,
    pub max_retry_interval_in_ms: u32,
    pub retry_factor: f64,
    pub retry_jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            initial_retry_interval_in_ms: DEFAULT_INITIAL_RETRY_INTERVAL_IN_MS,
            max_retry_interval_in_ms: DEFAULT_MAX_RETRY_INTERVAL_IN_MS,
            retry_factor: DEFAULT_RETRY_FACTOR,
            retry_jitter: DEFAULT_RETRY_JITTER,
        }
    }
}

impl RetryConfig {
    /// A fresh backoff iterator; yields at most `max_retry_attempts` delays.
    pub fn backoff(&self) -> Exponential {
        Exponential::from_millis(
            self.initial_retry_interval_in_ms,
            self.max_retry_interval_in_ms,
            self.retry_factor,
            self.retry_jitter,
            Some(self.max_retry_attempts),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.initial_retry_interval_in_ms, 100);
        assert_eq!(config.max_retry_interval_in_ms, 5_000);
        assert_eq!(config.backoff().count(), 3);
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let config = RetryConfig {
            max_retry_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.backoff().next(), None);
    }
}
