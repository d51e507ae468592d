use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::info;

use quorum_lock::{DynLockStore, QuorumConfig, QuorumLockManager, resource_key};
use quorum_lock_memory::MemoryLockStore;
use quorum_lock_redis::{RedisLockStore, RedisStoreConfig};

/// Top-level contents of `quorum-lock.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub stores: Vec<StoreEntry>,
}

/// `[lock]` section. Unset values keep the library defaults.
#[derive(Debug, Default, Deserialize)]
pub struct LockSection {
    /// Prefix joined to every resource as `{namespace}.{resource}`.
    pub namespace: Option<String>,
    pub default_ttl_ms: Option<u64>,
    pub store_timeout_ms: Option<u64>,
    pub drift_factor: Option<f64>,
    pub drift_constant_ms: Option<u64>,
    /// Keep-alive interval for `exec`; half the TTL when unset.
    pub extend_interval_ms: Option<u64>,
}

/// `[retry]` section.
#[derive(Debug, Default, Deserialize)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub delay_min_ms: Option<u64>,
    pub delay_max_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Redis,
    /// In-process store, only useful for trying the tool out locally.
    Memory,
}

/// One `[[stores]]` entry.
#[derive(Debug, Deserialize)]
pub struct StoreEntry {
    pub id: String,
    pub backend: Backend,
    pub url: Option<String>,
    pub prefix: Option<String>,
    pub pool_size: Option<usize>,
}

impl FileConfig {
    /// Load configuration from `path`, or use defaults if the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn quorum_config(&self) -> QuorumConfig {
        let mut config = QuorumConfig::default();
        if let Some(ttl) = self.lock.default_ttl_ms {
            config.default_ttl = Duration::from_millis(ttl);
        }
        if let Some(timeout) = self.lock.store_timeout_ms {
            config.store_timeout = Some(Duration::from_millis(timeout));
        }
        if let Some(factor) = self.lock.drift_factor {
            config.drift.factor = factor;
        }
        if let Some(constant) = self.lock.drift_constant_ms {
            config.drift.constant = Duration::from_millis(constant);
        }
        if let Some(retries) = self.retry.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(min) = self.retry.delay_min_ms {
            config.retry.delay_min = Duration::from_millis(min);
        }
        if let Some(max) = self.retry.delay_max_ms {
            config.retry.delay_max = Duration::from_millis(max);
        }
        config
    }

    pub fn build_stores(&self) -> anyhow::Result<Vec<DynLockStore>> {
        if self.stores.is_empty() {
            bail!("no [[stores]] configured");
        }

        let mut stores: Vec<DynLockStore> = Vec::with_capacity(self.stores.len());
        for entry in &self.stores {
            match entry.backend {
                Backend::Redis => {
                    let mut redis = RedisStoreConfig::default();
                    if let Some(url) = &entry.url {
                        redis.url.clone_from(url);
                    }
                    if let Some(prefix) = &entry.prefix {
                        redis.prefix.clone_from(prefix);
                    }
                    if let Some(pool_size) = entry.pool_size {
                        redis.pool_size = pool_size;
                    }
                    let store = RedisLockStore::new(entry.id.clone(), &redis)
                        .with_context(|| format!("store {}", entry.id))?;
                    stores.push(Arc::new(store));
                }
                Backend::Memory => stores.push(Arc::new(MemoryLockStore::new(entry.id.clone()))),
            }
        }
        Ok(stores)
    }

    pub fn manager(&self) -> anyhow::Result<QuorumLockManager> {
        let manager = QuorumLockManager::new(self.build_stores()?, self.quorum_config())?;
        Ok(manager)
    }

    /// Full resource name for `id`, namespaced when `[lock] namespace` is set.
    pub fn resource(&self, id: &str) -> String {
        match &self.lock.namespace {
            Some(namespace) => resource_key(namespace, id),
            None => id.to_string(),
        }
    }

    pub fn extend_interval(&self, ttl: Duration) -> Duration {
        self.lock
            .extend_interval_ms
            .map_or(ttl / 2, Duration::from_millis)
    }
}
