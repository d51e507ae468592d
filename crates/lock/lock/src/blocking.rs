//! Blocking access to a [`QuorumLockManager`] for synchronous callers.

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::error::LockError;
use crate::handle::Lock;
use crate::manager::{AcquireOptions, QuorumLockManager};

/// Runs manager calls to completion on a private current-thread runtime.
///
/// Must not be used from inside an async context. Stores whose connections
/// are bound to a runtime (such as pooled Redis connections) should be built
/// for use from this runtime.
#[derive(Debug)]
pub struct BlockingLockManager {
    inner: QuorumLockManager,
    runtime: Runtime,
}

impl BlockingLockManager {
    /// Wrap `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Config`] if the runtime cannot be created.
    pub fn new(manager: QuorumLockManager) -> Result<Self, LockError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LockError::Config(format!("failed to build runtime: {e}")))?;
        Ok(Self {
            inner: manager,
            runtime,
        })
    }

    /// The wrapped async manager.
    pub fn manager(&self) -> &QuorumLockManager {
        &self.inner
    }

    pub fn acquire(&self, resource: &str, ttl: Duration) -> Result<Lock, LockError> {
        self.runtime.block_on(self.inner.acquire(resource, ttl))
    }

    pub fn acquire_with(
        &self,
        resource: &str,
        ttl: Duration,
        options: &AcquireOptions,
    ) -> Result<Lock, LockError> {
        self.runtime
            .block_on(self.inner.acquire_with(resource, ttl, options))
    }

    pub fn extend(&self, lock: &mut Lock, ttl: Duration) -> Result<(), LockError> {
        self.runtime.block_on(self.inner.extend(lock, ttl))
    }

    pub fn release(&self, lock: Lock) -> Result<(), LockError> {
        self.runtime.block_on(self.inner.release(lock))
    }
}
