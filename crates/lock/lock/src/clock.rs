//! Monotonic time and clock drift allowances.
//!
//! Every elapsed-time measurement in this crate goes through
//! [`tokio::time::Instant`], which is monotonic and follows the paused clock
//! of `#[tokio::test(start_paused = true)]`. Wall-clock time is never used.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::LockError;

/// Current monotonic time.
pub fn now() -> Instant {
    Instant::now()
}

/// Conservative allowance for clock and network skew between stores.
///
/// The validity of a lease is `ttl - elapsed - (factor * ttl + constant)`.
/// A result of zero or less means the lease cannot be trusted for any
/// positive duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftModel {
    /// Fraction of the TTL reserved for skew.
    pub factor: f64,
    /// Fixed reserve for scheduling jitter.
    pub constant: Duration,
}

impl DriftModel {
    /// Total allowance subtracted for a lease of `ttl`.
    pub fn allowance(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.factor) + self.constant
    }

    /// Validity left in a lease of `ttl` after `elapsed`, or `None` when the
    /// allowance consumes all of it.
    pub fn validity(&self, ttl: Duration, elapsed: Duration) -> Option<Duration> {
        ttl.checked_sub(elapsed)?
            .checked_sub(self.allowance(ttl))
            .filter(|validity| !validity.is_zero())
    }

    /// Check that the factor is a usable fraction.
    pub fn validate(&self) -> Result<(), LockError> {
        if !self.factor.is_finite() || !(0.0..1.0).contains(&self.factor) {
            return Err(LockError::Config(format!(
                "drift factor must be within [0, 1), got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

impl Default for DriftModel {
    fn default() -> Self {
        Self {
            factor: 0.01,
            constant: Duration::from_millis(2),
        }
    }
}
