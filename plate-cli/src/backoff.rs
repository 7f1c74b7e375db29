//! Reconnect delay policy shared by the `listen` and `simulate` commands.

use std::time::Duration;

use crate::error::{Result, SessionError};

pub const DEFAULT_BACKOFF_MS: u64 = 3000;

/// Delay schedule between reconnect attempts.
///
/// The default waits a fixed 3 seconds and retries forever. A multiplier above
/// 1.0 turns it into exponential backoff, optionally capped by
/// `max_delay_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Upper bound for the grown delay. `None` leaves it unbounded.
    pub max_delay_ms: Option<u64>,
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub use_jitter: bool,
    /// Consecutive failed attempts allowed before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_BACKOFF_MS,
            max_delay_ms: None,
            multiplier: 1.0,
            use_jitter: false,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// A constant delay with unlimited attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay_ms: delay.as_millis().try_into().unwrap_or(u64::MAX),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SessionError::InvalidArgument(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if let Some(max) = self.max_delay_ms
            && max < self.initial_delay_ms
        {
            return Err(SessionError::InvalidArgument(format!(
                "max backoff {max}ms is below the initial backoff {}ms",
                self.initial_delay_ms
            )));
        }
        Ok(())
    }

    /// Delay to wait before reconnect attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = match self.max_delay_ms {
            Some(max) => base.min(max as f64),
            None => base,
        };
        // Float to int casts saturate, so an overflowed base lands on u64::MAX.
        let delay_ms = capped as u64;

        if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            Duration::from_millis(delay_ms.saturating_add(jitter))
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Whether another attempt is allowed after `attempt` consecutive failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_three_seconds_forever() {
        let policy = BackoffPolicy::default();
        for attempt in [0, 1, 5, 100, u32::MAX] {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(3));
            assert!(policy.should_retry(attempt));
        }
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = BackoffPolicy {
            initial_delay_ms: 100,
            max_delay_ms: Some(1000),
            multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_uncapped_growth_saturates() {
        let policy = BackoffPolicy {
            initial_delay_ms: 1000,
            multiplier: 10.0,
            ..Default::default()
        };
        assert_eq!(
            policy.delay_for_attempt(u32::MAX),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = BackoffPolicy {
            initial_delay_ms: 1000,
            use_jitter: true,
            ..Default::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_attempt_limit() {
        let policy = BackoffPolicy::default().with_max_attempts(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        assert!(!BackoffPolicy::default().with_max_attempts(0).should_retry(0));
    }

    #[test]
    fn test_validate() {
        assert!(BackoffPolicy::default().validate().is_ok());

        let shrinking = BackoffPolicy {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = BackoffPolicy {
            max_delay_ms: Some(100),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_fixed() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(25));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(25));
        assert_eq!(policy.max_attempts, None);
    }
}
