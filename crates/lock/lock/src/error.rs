use std::time::Duration;

use thiserror::Error;

/// Errors from a single lock store call.
///
/// A store failing or timing out only counts against the quorum of the call
/// it belongs to; it is never returned to callers on its own.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from quorum lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("quorum not reached for {resource}: {acquired} of {required} stores")]
    QuorumNotReached {
        resource: String,
        acquired: usize,
        required: usize,
    },

    #[error("validity window for {resource} consumed after {elapsed:?}")]
    ValidityExpired { resource: String, elapsed: Duration },

    #[error("lock {resource} is held by another token")]
    TokenMismatch { resource: String },

    #[error("failed to extend {resource}: {reason}")]
    ExtensionFailed { resource: String, reason: String },

    #[error("release of {resource} confirmed by {released} of {required} stores")]
    ReleaseIncomplete {
        resource: String,
        released: usize,
        required: usize,
    },

    #[error("deadline reached while acquiring {resource}")]
    DeadlineExceeded { resource: String },

    #[error("acquisition of {resource} was cancelled")]
    Cancelled { resource: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LockError {
    /// Whether a fresh acquisition attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuorumNotReached { .. } | Self::ValidityExpired { .. }
        )
    }
}
