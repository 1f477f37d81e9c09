//! Bounded retry with exponential backoff and full jitter for storage calls.
//!
//! The backoff ceiling doubles per attempt up to `max_delay`; the actual
//! delay is drawn uniformly between `base_delay` and that ceiling, so
//! workers throttled together do not retry together.
//!
//! Only [`StorageError::Transient`] errors are retried; permanent errors are
//! returned immediately. Every storage operation the pipeline issues is
//! idempotent (puts, ACL changes and metadata replacement converge to the same
//! state), so replaying one is always safe.

use crate::storage::{StorageError, StorageResult};
use std::time::Duration;
use tracing::debug;

/// Retry behavior for storage calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Shortest delay, and the backoff ceiling of the first retry
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the delay before retry number `attempt` (1-based).
    fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay before retry number `attempt` (1-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        let floor = self.base_delay.min(ceiling);
        if ceiling <= floor {
            return ceiling;
        }
        let millis = rand::random_range(floor.as_millis() as u64..=ceiling.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Run `operation`, retrying transient failures per `policy`.
///
/// Blocks the calling worker thread while backing off.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: impl FnMut() -> StorageResult<T>,
) -> StorageResult<T> {
    let mut attempt = 0u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err @ StorageError::Transient { .. }) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                debug!("{} attempt {} failed, retrying in {:?}: {}", label, attempt, delay, err);
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn ceiling_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(400));
    }

    #[test]
    fn ceiling_is_capped() {
        let policy = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_ceiling(10), Duration::from_secs(5));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_secs(5));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=8 {
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= policy.base_delay);
                assert!(delay <= policy.backoff_ceiling(attempt));
            }
        }
    }

    #[test]
    fn jitter_spreads_delays() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(60),
        };
        let delays: std::collections::HashSet<_> =
            (0..100).map(|_| policy.delay_for_attempt(10)).collect();
        assert!(delays.len() > 1);
    }

    #[test]
    fn first_attempt_without_room_uses_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), policy.base_delay);
    }

    #[test]
    fn immediate_success_calls_once() {
        let calls = Cell::new(0);
        let result = with_retry(&fast(3), "test", || {
            calls.set(calls.get() + 1);
            Ok(42)
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&fast(3), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StorageError::transient("put_object", "SlowDown"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Cell::new(0);
        let result: StorageResult<()> = with_retry(&fast(2), "test", || {
            calls.set(calls.get() + 1);
            Err(StorageError::transient("put_object", "SlowDown"))
        });
        assert!(matches!(result, Err(StorageError::Transient { .. })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: StorageResult<()> = with_retry(&fast(3), "test", || {
            calls.set(calls.get() + 1);
            Err(StorageError::permanent("put_object", "AccessDenied"))
        });
        assert!(matches!(result, Err(StorageError::Permanent { .. })));
        assert_eq!(calls.get(), 1);
    }
}
