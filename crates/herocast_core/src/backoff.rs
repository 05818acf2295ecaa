use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Jitter used by the message thread and send paths.
pub const DIRECT_MESSAGE_JITTER: f64 = 0.1;
/// Jitter used by the conversation list path.
pub const CONVERSATION_JITTER: f64 = 0.25;

/// Configures retry budget and backoff growth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the raw delay used as the jitter amplitude.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
            jitter_fraction: DIRECT_MESSAGE_JITTER,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryConfigError {
    #[error("max_attempts must be > 0")]
    ZeroAttempts,
    #[error("base_delay must be > 0")]
    ZeroBaseDelay,
    #[error("max_delay ({max_ms} ms) must be >= base_delay ({base_ms} ms)")]
    MaxBelowBase { base_ms: u128, max_ms: u128 },
    #[error("backoff_factor must be > 1, got {0}")]
    FactorTooSmall(f64),
    #[error("jitter_fraction must be in [0, 1), got {0}")]
    JitterOutOfRange(f64),
}

impl RetryConfig {
    pub fn with_jitter(self, jitter_fraction: f64) -> Self {
        Self {
            jitter_fraction,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_attempts == 0 {
            return Err(RetryConfigError::ZeroAttempts);
        }
        if self.base_delay.is_zero() {
            return Err(RetryConfigError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(RetryConfigError::MaxBelowBase {
                base_ms: self.base_delay.as_millis(),
                max_ms: self.max_delay.as_millis(),
            });
        }
        if !(self.backoff_factor > 1.0) {
            return Err(RetryConfigError::FactorTooSmall(self.backoff_factor));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(RetryConfigError::JitterOutOfRange(self.jitter_fraction));
        }
        Ok(())
    }
}

/// Capped exponential delay for `attempt` without jitter, in milliseconds.
pub fn raw_delay_ms(attempt: u32, config: &RetryConfig) -> f64 {
    let exponent = attempt.max(1).saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_ms = config.base_delay.as_millis() as f64;
    let max_ms = config.max_delay.as_millis() as f64;
    let grown = base_ms * config.backoff_factor.powi(exponent);
    if grown.is_finite() {
        grown.min(max_ms)
    } else {
        max_ms
    }
}

pub fn raw_delay(attempt: u32, config: &RetryConfig) -> Duration {
    Duration::from_millis(raw_delay_ms(attempt, config) as u64)
}

/// Delay to wait before retrying after failed attempt number `attempt` (1-based).
///
/// Not deterministic: the jitter term draws from the thread-local RNG.
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    compute_delay_with(attempt, config, &mut rand::thread_rng())
}

pub fn compute_delay_with<R>(attempt: u32, config: &RetryConfig, rng: &mut R) -> Duration
where
    R: Rng,
{
    let raw = raw_delay_ms(attempt, config);
    let jitter = if config.jitter_fraction > 0.0 {
        raw * config.jitter_fraction * rng.gen_range(-1.0..=1.0)
    } else {
        0.0
    };
    let total = (raw + jitter).floor().max(0.0);
    Duration::from_millis(total as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ms(config: &RetryConfig) -> (f64, f64) {
        (
            config.base_delay.as_millis() as f64,
            config.max_delay.as_millis() as f64,
        )
    }

    #[test]
    fn default_config_matches_direct_message_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.backoff_factor, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn delay_never_exceeds_cap_plus_jitter() {
        let mut rng = StdRng::seed_from_u64(7);
        for jitter in [0.0, DIRECT_MESSAGE_JITTER, CONVERSATION_JITTER] {
            let config = RetryConfig::default().with_jitter(jitter);
            let (_, max_ms) = ms(&config);
            for attempt in 1..=40 {
                for _ in 0..50 {
                    let delay = compute_delay_with(attempt, &config, &mut rng).as_millis() as f64;
                    assert!(delay <= max_ms * (1.0 + jitter), "attempt {attempt}: {delay}");
                }
            }
        }
    }

    #[test]
    fn jittered_delay_stays_within_fraction_of_raw() {
        let config = RetryConfig::default().with_jitter(CONVERSATION_JITTER);
        for attempt in 1..=5 {
            let raw = raw_delay_ms(attempt, &config);
            for _ in 0..200 {
                let delay = compute_delay(attempt, &config).as_millis() as f64;
                assert!(delay >= (raw * 0.75).floor());
                assert!(delay <= raw * 1.25);
            }
        }
    }

    #[test]
    fn raw_delay_grows_monotonically_until_cap() {
        let config = RetryConfig::default();
        let mut previous = 0.0;
        for attempt in 1..=12 {
            let current = raw_delay_ms(attempt, &config);
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(raw_delay(1, &config), Duration::from_millis(1000));
        assert_eq!(raw_delay(2, &config), Duration::from_millis(2000));
        assert_eq!(raw_delay(3, &config), Duration::from_millis(4000));
        assert_eq!(raw_delay(5, &config), Duration::from_millis(10_000));
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_cap() {
        let config = RetryConfig::default().with_jitter(0.0);
        assert_eq!(
            compute_delay(u32::MAX, &config),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn attempt_zero_is_treated_as_first_attempt() {
        let config = RetryConfig::default();
        assert_eq!(raw_delay(0, &config), raw_delay(1, &config));
    }

    #[test]
    fn validate_rejects_each_bad_bound() {
        let base = RetryConfig::default();
        assert_eq!(
            RetryConfig {
                max_attempts: 0,
                ..base
            }
            .validate(),
            Err(RetryConfigError::ZeroAttempts)
        );
        assert_eq!(
            RetryConfig {
                base_delay: Duration::ZERO,
                ..base
            }
            .validate(),
            Err(RetryConfigError::ZeroBaseDelay)
        );
        assert!(matches!(
            RetryConfig {
                max_delay: Duration::from_millis(10),
                ..base
            }
            .validate(),
            Err(RetryConfigError::MaxBelowBase { .. })
        ));
        assert!(matches!(
            RetryConfig {
                backoff_factor: 1.0,
                ..base
            }
            .validate(),
            Err(RetryConfigError::FactorTooSmall(_))
        ));
        assert!(matches!(
            base.with_jitter(1.0).validate(),
            Err(RetryConfigError::JitterOutOfRange(_))
        ));
    }
}
