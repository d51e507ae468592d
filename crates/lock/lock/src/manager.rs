use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock;
use crate::config::{QuorumConfig, quorum_size};
use crate::error::LockError;
use crate::fanout::{Completion, StoreOutcome, Tally, fan_out};
use crate::handle::{Lock, LockState};
use crate::keepalive::{KeepAlive, Lease};
use crate::retry::RetryPolicy;
use crate::store::DynLockStore;
use crate::token::LockToken;

/// Per-call options for [`QuorumLockManager::acquire_with`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use quorum_lock::{AcquireOptions, RetryPolicy};
///
/// let options = AcquireOptions::default()
///     .retry(RetryPolicy::none())
///     .timeout(Duration::from_secs(2));
/// assert!(options.deadline.is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Overrides the configured retry policy.
    pub retry: Option<RetryPolicy>,
    /// Give up once this instant passes.
    pub deadline: Option<Instant>,
    /// Give up once this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl AcquireOptions {
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now. A timeout too large to represent
    /// leaves the deadline unset.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        match clock::now().checked_add(timeout) {
            Some(deadline) => self.deadline(deadline),
            None => self,
        }
    }

    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Grants leases that are valid only while a quorum of independent stores
/// agrees on the holder.
///
/// The manager keeps no per-lock state: it holds the store handles and an
/// immutable configuration, and is cheap to clone and safe to share between
/// tasks acquiring different resources concurrently. All exclusion comes from
/// the stores' atomic primitives.
#[derive(Clone)]
pub struct QuorumLockManager {
    stores: Arc<[DynLockStore]>,
    config: Arc<QuorumConfig>,
    quorum: usize,
}

impl std::fmt::Debug for QuorumLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumLockManager")
            .field(
                "stores",
                &self.stores.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("quorum", &self.quorum)
            .field("config", &self.config)
            .finish()
    }
}

impl QuorumLockManager {
    /// Build a manager over `stores`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Config`] for an empty store list, duplicate store
    /// ids, or an invalid [`QuorumConfig`].
    pub fn new(stores: Vec<DynLockStore>, config: QuorumConfig) -> Result<Self, LockError> {
        if stores.is_empty() {
            return Err(LockError::Config("at least one lock store is required".into()));
        }
        let mut seen = HashSet::new();
        for store in &stores {
            if !seen.insert(store.id()) {
                return Err(LockError::Config(format!(
                    "duplicate lock store id: {}",
                    store.id()
                )));
            }
        }
        config.validate()?;

        if stores.len() % 2 == 0 {
            warn!(
                stores = stores.len(),
                "even number of lock stores tolerates no more failures than one store fewer"
            );
        }

        let quorum = quorum_size(stores.len());
        Ok(Self {
            stores: stores.into(),
            config: Arc::new(config),
            quorum,
        })
    }

    /// Number of stores that must agree.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Number of configured stores.
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Acquire `resource` for `ttl` using the configured retry policy.
    pub async fn acquire(&self, resource: &str, ttl: Duration) -> Result<Lock, LockError> {
        self.acquire_with(resource, ttl, &AcquireOptions::default())
            .await
    }

    /// Acquire `resource` for `ttl`, honouring the deadline and cancellation
    /// in `options`.
    ///
    /// Dropping the returned future mid-attempt leaves partial holds to expire
    /// with their TTL; use `options.cancel` or `options.deadline` to have them
    /// cleaned up instead.
    #[instrument(skip_all, fields(resource = %resource, ttl_ms = %ttl.as_millis()))]
    pub async fn acquire_with(
        &self,
        resource: &str,
        ttl: Duration,
        options: &AcquireOptions,
    ) -> Result<Lock, LockError> {
        self.config.check_ttl(ttl)?;
        let retry = options.retry.unwrap_or(self.config.retry);
        retry.validate()?;

        let mut attempt = 0;
        loop {
            if options.deadline.is_some_and(|deadline| clock::now() >= deadline) {
                return Err(LockError::DeadlineExceeded {
                    resource: resource.to_owned(),
                });
            }
            if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(LockError::Cancelled {
                    resource: resource.to_owned(),
                });
            }

            let token = LockToken::generate();
            let interrupted = tokio::select! {
                result = self.attempt(resource, &token, ttl) => Ok(result),
                () = until(options.deadline) => Err(LockError::DeadlineExceeded {
                    resource: resource.to_owned(),
                }),
                () = cancelled(options.cancel.as_ref()) => Err(LockError::Cancelled {
                    resource: resource.to_owned(),
                }),
            };

            let result = match interrupted {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "acquisition interrupted, removing partial holds");
                    let all: Vec<usize> = (0..self.stores.len()).collect();
                    self.delete_token(resource, &token, ttl, &all).await;
                    return Err(err);
                }
            };

            match result {
                Ok(lock) => {
                    info!(
                        attempt,
                        validity_ms = %lock.remaining().as_millis(),
                        "lock acquired"
                    );
                    return Ok(lock);
                }
                Err(err) if err.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.jittered_delay();
                    warn!(
                        attempt,
                        error = %err,
                        delay_ms = %delay.as_millis(),
                        "lock attempt failed, will retry"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = until(options.deadline) => {
                            return Err(LockError::DeadlineExceeded { resource: resource.to_owned() });
                        }
                        () = cancelled(options.cancel.as_ref()) => {
                            return Err(LockError::Cancelled { resource: resource.to_owned() });
                        }
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "lock not acquired");
                    return Err(err);
                }
            }
        }
    }

    /// Acquire `resource` for the configured default TTL.
    pub async fn acquire_default(&self, resource: &str) -> Result<Lock, LockError> {
        self.acquire(resource, self.config.default_ttl).await
    }

    /// One acquisition round with a single token. Cleans up after itself on
    /// failure.
    async fn attempt(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<Lock, LockError> {
        let started = clock::now();
        let deadline = started + self.config.store_timeout_for(ttl);

        let tally = fan_out(
            &self.stores,
            self.quorum,
            deadline,
            Completion::Decided,
            |store| async move {
                store
                    .try_set(resource, token, ttl)
                    .await
                    .map(StoreOutcome::from_set)
            },
        )
        .await;

        let elapsed = started.elapsed();
        let acquired = tally.accepted();
        if tally.reached_quorum() {
            if let Some(validity) = self.config.drift.validity(ttl, elapsed) {
                return Ok(Lock::new(resource, token.clone(), started, ttl, validity));
            }
        }

        self.delete_token(resource, token, ttl, &tally.possibly_holding())
            .await;

        if acquired < self.quorum {
            Err(LockError::QuorumNotReached {
                resource: resource.to_owned(),
                acquired,
                required: self.quorum,
            })
        } else {
            Err(LockError::ValidityExpired {
                resource: resource.to_owned(),
                elapsed,
            })
        }
    }

    /// Extend a held lease to `ttl` from now.
    ///
    /// The manager never retries an extension. Any error leaves `lock` in
    /// [`LockState::Lost`] and the caller must stop acting as the owner.
    #[instrument(skip_all, fields(resource = %lock.resource(), ttl_ms = %ttl.as_millis()))]
    pub async fn extend(&self, lock: &mut Lock, ttl: Duration) -> Result<(), LockError> {
        match lock.state() {
            LockState::Held => {}
            LockState::Lost => {
                return Err(LockError::TokenMismatch {
                    resource: lock.resource().to_owned(),
                });
            }
            LockState::Expired => return self.reject_stale_extend(lock).await,
        }
        self.config.check_ttl(ttl)?;

        let resource = lock.resource().to_owned();
        let token = lock.token().clone();
        let started = clock::now();
        let deadline = (started + self.config.store_timeout_for(ttl)).min(lock.validity_until());

        let tally = fan_out(
            &self.stores,
            self.quorum,
            deadline,
            Completion::Decided,
            |store| {
                let (resource, token) = (&resource, &token);
                async move {
                    store
                        .compare_extend(resource, token, ttl)
                        .await
                        .map(StoreOutcome::from_compare)
                }
            },
        )
        .await;

        let finished = clock::now();
        if tally.reached_quorum() && finished < lock.validity_until() {
            if let Some(validity) = self.config.drift.validity(ttl, finished - started) {
                lock.renew(started, ttl, validity);
                debug!(validity_ms = %validity.as_millis(), "lock extended");
                return Ok(());
            }
        }

        lock.mark_lost();
        let err = if tally.mismatched() > 0 {
            LockError::TokenMismatch { resource }
        } else if tally.reached_quorum() {
            LockError::ExtensionFailed {
                resource,
                reason: "validity window closed before quorum confirmed".into(),
            }
        } else {
            LockError::ExtensionFailed {
                resource,
                reason: format!(
                    "{} of {} stores confirmed",
                    tally.accepted(),
                    self.quorum
                ),
            }
        };
        warn!(error = %err, "lock extension failed");
        Err(err)
    }

    /// An expired lease is never extended. Remove what is left of our token
    /// and report whether someone else took over.
    async fn reject_stale_extend(&self, lock: &mut Lock) -> Result<(), LockError> {
        lock.mark_lost();
        let all: Vec<usize> = (0..self.stores.len()).collect();
        let tally = self
            .delete_token(lock.resource(), lock.token(), lock.ttl(), &all)
            .await;

        let resource = lock.resource().to_owned();
        let err = if tally.is_some_and(|t| t.mismatched() > 0) {
            LockError::TokenMismatch { resource }
        } else {
            LockError::ExtensionFailed {
                resource,
                reason: "validity window already elapsed".into(),
            }
        };
        warn!(error = %err, "stale extension rejected");
        Err(err)
    }

    /// Release a lease on every store.
    ///
    /// Advisory: the TTL on each store frees the resource regardless. An error
    /// means fewer than a quorum of stores confirmed the deletion.
    #[instrument(skip_all, fields(resource = %lock.resource()))]
    pub async fn release(&self, lock: Lock) -> Result<(), LockError> {
        let all: Vec<usize> = (0..self.stores.len()).collect();
        let tally = self
            .delete_token(lock.resource(), lock.token(), lock.ttl(), &all)
            .await;
        let released = tally.as_ref().map_or(0, Tally::accepted);

        if released >= self.quorum {
            info!(released, "lock released");
            return Ok(());
        }

        let resource = lock.resource().to_owned();
        let err = if tally.is_some_and(|t| t.mismatched() > 0) {
            LockError::TokenMismatch { resource }
        } else {
            LockError::ReleaseIncomplete {
                resource,
                released,
                required: self.quorum,
            }
        };
        warn!(error = %err, "lock release incomplete");
        Err(err)
    }

    /// Best-effort `compare_delete` of `token` on the stores at `targets`.
    async fn delete_token(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
        targets: &[usize],
    ) -> Option<Tally> {
        if targets.is_empty() {
            return None;
        }
        let stores: Vec<DynLockStore> = targets
            .iter()
            .map(|&index| Arc::clone(&self.stores[index]))
            .collect();
        let deadline = clock::now() + self.config.store_timeout_for(ttl);

        let tally = fan_out(
            &stores,
            self.quorum,
            deadline,
            Completion::All,
            |store| async move {
                store
                    .compare_delete(resource, token)
                    .await
                    .map(StoreOutcome::from_compare)
            },
        )
        .await;
        debug!(
            targets = targets.len(),
            deleted = tally.accepted(),
            "token deleted from stores"
        );
        Some(tally)
    }

    /// Run `f` while holding `resource`, keeping the lease alive at `ttl / 2`
    /// and releasing it afterwards.
    ///
    /// `f` receives the fencing token and a signal that fires if the lease is
    /// lost while it runs. Release failures are logged rather than returned.
    /// Dropping the returned future stops the keep-alive and leaves the lease
    /// to expire with its TTL.
    pub async fn with_lock<F, Fut, T>(
        &self,
        resource: &str,
        ttl: Duration,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.acquire(resource, ttl).await?;
        if let Err(err) = KeepAlive::check_interval(&lock, ttl / 2) {
            if let Err(release_err) = self.release(lock).await {
                warn!(resource, error = %release_err, "scoped lock release failed");
            }
            return Err(err);
        }
        let keep_alive = self.keep_alive(lock, ttl / 2)?;
        let output = f(keep_alive.lease()).await;
        if let Err(err) = keep_alive.release().await {
            warn!(resource, error = %err, "scoped lock release failed");
        }
        Ok(output)
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
