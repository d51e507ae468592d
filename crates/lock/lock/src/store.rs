use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::token::LockToken;

/// Result of a token-guarded store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOutcome {
    /// The key held the presented token and the operation took effect.
    Matched,
    /// The key was absent or already expired.
    Missing,
    /// The key is held by a different token.
    Mismatch,
}

/// One independent lock store instance.
///
/// Every method must execute as a single atomic operation on the backend; a
/// check-then-act sequence split across round trips breaks mutual exclusion.
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Identifier of this store, unique among the stores of one manager.
    fn id(&self) -> &str;

    /// Set `key` to `token` with expiry `ttl` if the key is absent or expired.
    /// Returns `true` if the write took effect.
    async fn try_set(&self, key: &str, token: &LockToken, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `token`.
    async fn compare_delete(
        &self,
        key: &str,
        token: &LockToken,
    ) -> Result<CompareOutcome, StoreError>;

    /// Reset the expiry of `key` to `ttl` only if it currently holds `token`.
    async fn compare_extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<CompareOutcome, StoreError>;
}

/// Shared handle to a lock store.
pub type DynLockStore = Arc<dyn LockStore>;
