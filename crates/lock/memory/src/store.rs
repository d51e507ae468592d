use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use quorum_lock::error::StoreError;
use quorum_lock::store::{CompareOutcome, DynLockStore, LockStore};
use quorum_lock::token::LockToken;

/// Internal entry representing a held key.
#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug)]
struct Faults {
    available: AtomicBool,
    latency_us: AtomicU64,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            latency_us: AtomicU64::new(0),
        }
    }
}

/// In-memory [`LockStore`] backed by a [`DashMap`].
///
/// Expiry is lazy: an expired entry is treated as absent and replaced or
/// removed by the next call that touches it. Clones share the same map and
/// fault settings.
#[derive(Debug, Clone)]
pub struct MemoryLockStore {
    id: String,
    entries: Arc<DashMap<String, LockEntry>>,
    faults: Arc<Faults>,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: Arc::new(DashMap::new()),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Create `n` independent stores named `memory-0`, `memory-1`, ...
    pub fn cluster(n: usize) -> Vec<Self> {
        (0..n).map(|i| Self::new(format!("memory-{i}"))).collect()
    }

    /// Shared handles for a manager.
    pub fn shared(stores: &[Self]) -> Vec<DynLockStore> {
        stores
            .iter()
            .map(|store| Arc::new(store.clone()) as DynLockStore)
            .collect()
    }

    /// Make every call fail with a connection error while `false`.
    pub fn set_available(&self, available: bool) {
        self.faults.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before it touches the map.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.faults.latency_us.store(micros, Ordering::SeqCst);
    }

    /// Token currently holding `key`, if it has not expired.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.token.clone())
    }

    async fn simulate_network(&self) -> Result<(), StoreError> {
        let latency = Duration::from_micros(self.faults.latency_us.load(Ordering::SeqCst));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.faults.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection(format!("{} is unreachable", self.id)))
        }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_set(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.simulate_network().await?;

        let fresh = LockEntry {
            token: token.as_str().to_owned(),
            expires_at: Instant::now() + ttl,
        };
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired() => {
                occupied.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn compare_delete(
        &self,
        key: &str,
        token: &LockToken,
    ) -> Result<CompareOutcome, StoreError> {
        self.simulate_network().await?;

        let outcome = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(occupied) if occupied.get().is_expired() => {
                occupied.remove();
                CompareOutcome::Missing
            }
            Entry::Occupied(occupied) if occupied.get().token == token.as_str() => {
                occupied.remove();
                CompareOutcome::Matched
            }
            Entry::Occupied(_) => CompareOutcome::Mismatch,
            Entry::Vacant(_) => CompareOutcome::Missing,
        };
        Ok(outcome)
    }

    async fn compare_extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<CompareOutcome, StoreError> {
        self.simulate_network().await?;

        let outcome = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(occupied) if occupied.get().is_expired() => {
                occupied.remove();
                CompareOutcome::Missing
            }
            Entry::Occupied(mut occupied) if occupied.get().token == token.as_str() => {
                occupied.get_mut().expires_at = Instant::now() + ttl;
                CompareOutcome::Matched
            }
            Entry::Occupied(_) => CompareOutcome::Mismatch,
            Entry::Vacant(_) => CompareOutcome::Missing,
        };
        Ok(outcome)
    }
}
