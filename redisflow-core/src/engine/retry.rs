use std::time::Duration;

use rand::Rng;

/// Exponential backoff: the n-th delay is `base * factor^(n-1)`, optionally jittered, capped at
/// `max_interval`, for at most `max_attempts` delays.
#[derive(Debug, Clone)]
pub struct Exponential {
    base_interval: Duration,
    max_interval: Duration,
    factor: f64,
    /// Between 0.0 and 1.0; each delay is scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    jitter: f64,
    max_attempts: Option<u16>,
    attempt: u16,
}

impl Exponential {
    pub fn new(
        base_interval: Duration,
        max_interval: Duration,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self {
            base_interval,
            max_interval,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_millis(
        base_interval_ms: u32,
        max_interval_ms: u32,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self::new(
            Duration::from_millis(base_interval_ms.into()),
            Duration::from_millis(max_interval_ms.into()),
            factor,
            jitter,
            max_attempts,
        )
    }

    /// Delays handed out so far.
    pub fn attempts(&self) -> u16 {
        self.attempt
    }

    fn delay(&self, attempt: u16) -> Duration {
        // attempt is at least 1 here, so the exponent never goes negative
        let exponent = i32::from(attempt.max(1) - 1);
        let mut delay_ms = self.base_interval.as_millis() as f64 * self.factor.powi(exponent);

        if self.jitter > 0.0 {
            delay_ms *= rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        }

        Duration::from_millis(delay_ms as u64).min(self.max_interval)
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(max_attempts) = self.max_attempts
            && self.attempt >= max_attempts
        {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(self.delay(self.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_without_jitter() {
        let mut backoff = Exponential::from_millis(100, 10_000, 2.0, 0.0, None);
        assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_capped_at_max_interval() {
        let delays: Vec<_> = Exponential::from_millis(100, 250, 2.0, 0.0, Some(4)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
                Duration::from_millis(250),
            ]
        );
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let backoff = Exponential::from_millis(1_000, 60_000, 1.0, 0.5, Some(50));
        for delay in backoff {
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1_500));
        }
    }
}
