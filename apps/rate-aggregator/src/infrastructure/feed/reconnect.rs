//! Reconnection Policy
//!
//! Bounded exponential backoff for the feed connection. The delay for
//! attempt `n` (zero-based) is `initial * multiplier^n`, capped at
//! `max_delay`, with optional symmetric jitter. After `max_attempts`
//! delays the policy is exhausted until [`ReconnectPolicy::reset`] is
//! called on a successful open.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables it.
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(64_000),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Build from feed settings.
    #[must_use]
    pub const fn from_feed_settings(settings: &crate::FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter_factor,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Un-jittered delay for zero-based attempt `attempt`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max_millis = duration_millis_f64(self.max_delay);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = duration_millis_f64(self.initial_delay) * self.multiplier.powi(exponent);

        let millis = if scaled.is_finite() && scaled >= 0.0 {
            scaled.min(max_millis)
        } else {
            max_millis
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(millis.round() as u64)
    }
}

/// Reconnection state for one connection.
///
/// # Example
///
/// ```rust
/// use rate_aggregator::infrastructure::feed::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
///
/// // Connection opened again
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, consuming one attempt.
    ///
    /// Returns `None` once `max_attempts` delays have been handed out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = self.config.base_delay(self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);
        Some(self.apply_jitter(delay))
    }

    /// Forget previous attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let base = duration_millis_f64(delay);
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_millis_f64(duration: Duration) -> f64 {
    duration.as_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(1000));
        assert_eq!(config.max_delay, Duration::from_millis(64_000));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 10);
    }

    #[test_case(0 => 1_000)]
    #[test_case(1 => 2_000)]
    #[test_case(2 => 4_000)]
    #[test_case(3 => 8_000)]
    #[test_case(5 => 32_000)]
    #[test_case(6 => 64_000)]
    #[test_case(7 => 64_000 ; "capped after six doublings")]
    #[test_case(9 => 64_000)]
    #[test_case(200 => 64_000 ; "huge exponent stays capped")]
    fn base_delay_sequence(attempt: u32) -> u128 {
        ReconnectConfig::default().base_delay(attempt).as_millis()
    }

    #[test]
    fn ten_delays_then_exhausted() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let delays: Vec<u128> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();

        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 64_000, 64_000, 64_000]
        );
        assert_eq!(policy.attempt_count(), 10);
        assert!(!policy.should_retry());
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }
}
