use std::time::Duration;

use rand::Rng;

use crate::error::LockError;

/// Bounded retry policy for lock acquisition.
///
/// Each retry waits a delay drawn uniformly from `[delay_min, delay_max]` so
/// that competing clients which failed together do not retry together.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use quorum_lock::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// let delay = policy.jittered_delay();
/// assert!(delay >= policy.delay_min && delay <= policy.delay_max);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub max_retries: u32,
    /// Lower bound of the delay before a retry.
    pub delay_min: Duration,
    /// Upper bound of the delay before a retry.
    pub delay_max: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Draw the delay to wait before the next attempt.
    pub fn jittered_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let min = saturating_nanos(self.delay_min);
        let max = saturating_nanos(self.delay_max);
        // Create rng here to avoid holding a non-Send type across an await.
        let nanos = rand::thread_rng().gen_range(min..=max);
        Duration::from_nanos(nanos)
    }

    /// Check the delay bounds.
    pub fn validate(&self) -> Result<(), LockError> {
        if self.delay_min > self.delay_max {
            return Err(LockError::Config(format!(
                "retry delay_min {:?} exceeds delay_max {:?}",
                self.delay_min, self.delay_max
            )));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_min: Duration::from_millis(100),
            delay_max: Duration::from_millis(300),
        }
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
