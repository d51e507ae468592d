use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::Script;

use quorum_lock::{CompareOutcome, LockStore, LockToken, StoreError};

use crate::config::RedisStoreConfig;
use crate::scripts;

/// [`LockStore`] backed by a single Redis instance.
///
/// Uses a `deadpool-redis` connection pool; every operation is one Lua
/// script invocation.
pub struct RedisLockStore {
    id: String,
    pool: Pool,
    prefix: String,
}

impl RedisLockStore {
    /// Create a store named `id` from the provided configuration.
    ///
    /// The pool connects lazily, so an unreachable server only shows up as
    /// failed calls.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the pool cannot be created.
    pub fn new(id: impl Into<String>, config: &RedisStoreConfig) -> Result<Self, StoreError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            id: id.into(),
            pool,
            prefix: config.prefix.clone(),
        })
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn compare(
        &self,
        script: &str,
        key: &str,
        token: &LockToken,
        ttl: Option<Duration>,
    ) -> Result<CompareOutcome, StoreError> {
        let redis_key = self.lock_key(key);
        let mut conn = self.conn().await?;

        let script = Script::new(script);
        let mut invocation = script.key(&redis_key);
        invocation.arg(token.as_str());
        if let Some(ttl) = ttl {
            invocation.arg(ttl_millis(ttl));
        }
        let result: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(compare_outcome(result))
    }
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// `PX` argument for `ttl`: whole milliseconds rounded up, never below 1, so
/// the key never expires before the caller's validity window does.
fn ttl_millis(ttl: Duration) -> i64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000).max(1);
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn compare_outcome(result: i64) -> CompareOutcome {
    match result {
        1 => CompareOutcome::Matched,
        0 => CompareOutcome::Missing,
        _ => CompareOutcome::Mismatch,
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_set(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let redis_key = self.lock_key(key);
        let mut conn = self.conn().await?;

        let script = Script::new(scripts::LOCK_ACQUIRE);
        let result: i64 = script
            .key(&redis_key)
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result == 1)
    }

    async fn compare_delete(
        &self,
        key: &str,
        token: &LockToken,
    ) -> Result<CompareOutcome, StoreError> {
        self.compare(scripts::LOCK_RELEASE, key, token, None).await
    }

    async fn compare_extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<CompareOutcome, StoreError> {
        self.compare(scripts::LOCK_EXTEND, key, token, Some(ttl))
            .await
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> RedisStoreConfig {
        RedisStoreConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            prefix: format!("quorum-lock-test-{}", uuid::Uuid::new_v4()),
            ..RedisStoreConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = RedisLockStore::new("redis-it", &test_config())
            .expect("pool creation should succeed");
        quorum_lock::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }
}
