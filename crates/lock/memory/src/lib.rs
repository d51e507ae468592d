//! In-memory lock store for `quorum-lock`.
//!
//! Each [`MemoryLockStore`] stands in for one independent store. Latency and
//! outages can be injected per instance, which is how quorum behaviour is
//! exercised without real backends.

mod store;

pub use store::MemoryLockStore;
