use std::time::Duration;

use crate::clock::{self, DriftModel};
use crate::error::LockError;
use crate::retry::RetryPolicy;

/// Number of stores that must agree for a decision among `stores`.
pub fn quorum_size(stores: usize) -> usize {
    stores / 2 + 1
}

/// Configuration for a [`QuorumLockManager`](crate::QuorumLockManager).
///
/// Immutable once the manager is built.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use quorum_lock::QuorumConfig;
///
/// let config = QuorumConfig::default();
/// assert_eq!(config.default_ttl, Duration::from_secs(10));
/// assert_eq!(config.store_timeout_for(config.default_ttl), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QuorumConfig {
    /// TTL used by callers that do not choose one.
    pub default_ttl: Duration,
    /// Bound on a single store call. `None` means a tenth of the requested TTL.
    pub store_timeout: Option<Duration>,
    /// Retry behaviour for acquisition.
    pub retry: RetryPolicy,
    /// Skew allowance subtracted from every validity window.
    pub drift: DriftModel,
}

impl QuorumConfig {
    /// Effective per-store timeout for a lease of `ttl`.
    pub fn store_timeout_for(&self, ttl: Duration) -> Duration {
        self.store_timeout.unwrap_or(ttl / 10)
    }

    /// Check that a requested TTL leaves room for a store round trip.
    pub fn check_ttl(&self, ttl: Duration) -> Result<(), LockError> {
        if ttl.is_zero() {
            return Err(LockError::Config("lock ttl must be positive".into()));
        }
        if clock::now().checked_add(ttl).is_none() {
            return Err(LockError::Config(format!("lock ttl {ttl:?} is too large")));
        }
        let timeout = self.store_timeout_for(ttl);
        if timeout.is_zero() {
            return Err(LockError::Config("store timeout must be positive".into()));
        }
        if timeout >= ttl {
            return Err(LockError::Config(format!(
                "store timeout {timeout:?} must be shorter than ttl {ttl:?}"
            )));
        }
        Ok(())
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), LockError> {
        self.check_ttl(self.default_ttl)?;
        self.retry.validate()?;
        self.drift.validate()
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(10),
            store_timeout: None,
            retry: RetryPolicy::default(),
            drift: DriftModel::default(),
        }
    }
}
