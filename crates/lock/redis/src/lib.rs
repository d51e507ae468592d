//! Redis lock store for `quorum-lock`.
//!
//! Each [`RedisLockStore`] talks to one independent Redis instance. Give a
//! [`QuorumLockManager`](quorum_lock::QuorumLockManager) several of them,
//! backed by separate servers rather than replicas of one master, so that a
//! single failover cannot hand the same resource to two holders.
//!
//! Keys are laid out as `{prefix}:lock:{resource}`. All three store
//! operations run as Lua scripts so the compare and the write are atomic.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use quorum_lock::{DynLockStore, QuorumConfig, QuorumLockManager};
//! use quorum_lock_redis::{RedisLockStore, RedisStoreConfig};
//!
//! let stores: Vec<DynLockStore> = ["redis://a:6379", "redis://b:6379", "redis://c:6379"]
//!     .iter()
//!     .map(|url| {
//!         let config = RedisStoreConfig::new(*url);
//!         RedisLockStore::new(*url, &config).map(|s| Arc::new(s) as DynLockStore)
//!     })
//!     .collect::<Result<_, _>>()?;
//!
//! let manager = QuorumLockManager::new(stores, QuorumConfig::default())?;
//! let lock = manager.acquire("orders.42", Duration::from_secs(10)).await?;
//! // critical section
//! manager.release(lock).await?;
//! ```

mod config;
mod scripts;
mod store;

pub use config::RedisStoreConfig;
pub use store::RedisLockStore;
