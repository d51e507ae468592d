//! Quorum leases over independent lock stores.
//!
//! A [`QuorumLockManager`] grants a lease on a named resource only when a
//! majority of its configured [`LockStore`]s accepted the same random token,
//! and only for the part of the TTL that survives the elapsed round trip and
//! the [`DriftModel`] allowance.
//!
//! # Guarantees
//!
//! Two callers evaluating `acquire` independently cannot both hold a lease
//! with a positive validity window over overlapping time, provided every store
//! executes its three primitives atomically. Nothing is guaranteed about the
//! protected resource itself: pass [`Lock::token`] along as a fencing token
//! and have the resource reject writes carrying a superseded token.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use quorum_lock::{QuorumConfig, QuorumLockManager};
//!
//! let manager = QuorumLockManager::new(stores, QuorumConfig::default())?;
//! let lock = manager.acquire("reports.nightly", Duration::from_secs(10)).await?;
//! // ... leader-only work, guarded by lock.token() ...
//! manager.release(lock).await?;
//! ```

pub mod blocking;
pub mod clock;
pub mod config;
pub mod error;
mod fanout;
pub mod handle;
pub mod keepalive;
pub mod manager;
pub mod retry;
pub mod store;
pub mod testing;
pub mod token;

pub use blocking::BlockingLockManager;
pub use clock::DriftModel;
pub use config::{QuorumConfig, quorum_size};
pub use error::{LockError, StoreError};
pub use handle::{Lock, LockHandoff, LockState, resource_key};
pub use keepalive::{KeepAlive, Lease};
pub use manager::{AcquireOptions, QuorumLockManager};
pub use retry::RetryPolicy;
pub use store::{CompareOutcome, DynLockStore, LockStore};
pub use token::LockToken;
