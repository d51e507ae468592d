//! Background extension of a held lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
use tracing::{debug, warn};

use crate::error::LockError;
use crate::handle::Lock;
use crate::manager::QuorumLockManager;
use crate::token::LockToken;

/// What a scoped critical section gets to see of its lease.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Fencing token to pass to the protected resource.
    pub token: LockToken,
    /// Cancelled once the lease can no longer be kept alive.
    pub lost: CancellationToken,
}

/// A lease that is extended by its own TTL every `interval` until released.
///
/// On the first failed extension the background task stops and [`lost`]
/// resolves; from then on the holder must not act as the owner.
///
/// Dropping the handle without [`release`] stops the extensions; the stores
/// then free the resource once the last extended TTL runs out.
///
/// [`lost`]: KeepAlive::lost
/// [`release`]: KeepAlive::release
#[derive(Debug)]
pub struct KeepAlive {
    manager: QuorumLockManager,
    lock: Arc<Mutex<Option<Lock>>>,
    token: LockToken,
    stop: DropGuard,
    lost: CancellationToken,
    task: JoinHandle<()>,
}

impl QuorumLockManager {
    /// Keep `lock` alive in the background.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Config`] unless `0 < interval < lock.remaining()`;
    /// `lock` is dropped unreleased in that case, so callers holding a lease
    /// should run [`KeepAlive::check_interval`] first.
    pub fn keep_alive(&self, lock: Lock, interval: Duration) -> Result<KeepAlive, LockError> {
        KeepAlive::check_interval(&lock, interval)?;

        let token = lock.token().clone();
        let lock = Arc::new(Mutex::new(Some(lock)));
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();
        let task = tokio::spawn(extend_loop(
            self.clone(),
            Arc::clone(&lock),
            interval,
            stop.clone(),
            lost.clone(),
        ));

        Ok(KeepAlive {
            manager: self.clone(),
            lock,
            token,
            stop: stop.drop_guard(),
            lost,
            task,
        })
    }
}

impl KeepAlive {
    /// Check that the first extension can land inside the current validity
    /// window of `lock`.
    pub fn check_interval(lock: &Lock, interval: Duration) -> Result<(), LockError> {
        let remaining = lock.remaining();
        if interval.is_zero() || interval >= remaining {
            return Err(LockError::Config(format!(
                "extend interval {interval:?} must be positive and shorter than the remaining validity {remaining:?}"
            )));
        }
        Ok(())
    }

    /// Resolves once the lease is lost.
    pub fn lost(&self) -> WaitForCancellationFuture<'_> {
        self.lost.cancelled()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Token and loss signal for the code running under this lease.
    pub fn lease(&self) -> Lease {
        Lease {
            token: self.token.clone(),
            lost: self.lost.child_token(),
        }
    }

    /// Stop extending and release the lease.
    pub async fn release(self) -> Result<(), LockError> {
        self.stop.disarm().cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "keep-alive task ended abnormally");
        }
        let lock = self.lock.lock().await.take();
        match lock {
            Some(lock) => self.manager.release(lock).await,
            None => Ok(()),
        }
    }
}

async fn extend_loop(
    manager: QuorumLockManager,
    lock: Arc<Mutex<Option<Lock>>>,
    interval: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        let mut guard = lock.lock().await;
        let Some(held) = guard.as_mut() else {
            return;
        };
        let ttl = held.ttl();
        match manager.extend(held, ttl).await {
            Ok(()) => debug!(resource = held.resource(), "keep-alive extended lock"),
            Err(err) => {
                warn!(resource = held.resource(), error = %err, "keep-alive lost lock");
                lost.cancel();
                return;
            }
        }
    }
}
