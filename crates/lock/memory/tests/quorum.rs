use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use quorum_lock::{
    AcquireOptions, BlockingLockManager, CompareOutcome, DriftModel, DynLockStore, LockError,
    LockState, LockStore, LockToken, QuorumConfig, QuorumLockManager, RetryPolicy, StoreError,
};
use quorum_lock_memory::MemoryLockStore;

fn manager(stores: &[MemoryLockStore], config: QuorumConfig) -> QuorumLockManager {
    QuorumLockManager::new(MemoryLockStore::shared(stores), config).expect("valid config")
}

fn no_retry() -> QuorumConfig {
    QuorumConfig {
        retry: RetryPolicy::none(),
        ..QuorumConfig::default()
    }
}

fn holders(stores: &[MemoryLockStore], key: &str) -> Vec<Option<String>> {
    stores.iter().map(|store| store.holder(key)).collect()
}

fn assert_close(actual: Duration, expected: Duration, tolerance: Duration) {
    let diff = actual.abs_diff(expected);
    assert!(
        diff <= tolerance,
        "{actual:?} differs from {expected:?} by more than {tolerance:?}"
    );
}

// -- Mutual exclusion ---------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn contenders_never_hold_overlapping_windows() {
    let stores = MemoryLockStore::cluster(5);
    for (i, store) in stores.iter().enumerate() {
        store.set_latency(Duration::from_millis(1 + 2 * i as u64));
    }
    let ttl = Duration::from_secs(2);

    let mut windows: Vec<(Instant, Instant)> = Vec::new();
    for _round in 0..10 {
        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager(&stores, no_retry());
            handles.push(tokio::spawn(async move {
                manager.acquire("shared-resource", ttl).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if let Ok(lock) = handle.await.expect("task should not panic") {
                winners += 1;
                windows.push((lock.acquired_at(), lock.validity_until()));
            }
        }
        assert!(winners <= 1, "{winners} contenders acquired in one round");

        // Nobody releases; wait for the store TTL to free the key.
        tokio::time::sleep(ttl + Duration::from_millis(50)).await;
    }

    assert!(!windows.is_empty(), "some round should have a winner");
    for (i, a) in windows.iter().enumerate() {
        for b in &windows[i + 1..] {
            let overlap = a.0 < b.1 && b.0 < a.1;
            assert!(!overlap, "windows {a:?} and {b:?} overlap");
        }
    }
}

#[tokio::test]
async fn second_manager_cannot_acquire_held_resource() {
    let stores = MemoryLockStore::cluster(3);
    let first = manager(&stores, no_retry());
    let second = manager(&stores, no_retry());

    let lock = first
        .acquire("leader", Duration::from_secs(10))
        .await
        .expect("first manager should acquire");

    let result = second.acquire("leader", Duration::from_secs(10)).await;
    assert!(matches!(
        result,
        Err(LockError::QuorumNotReached { acquired: 0, .. })
    ));
    assert!(lock.is_held());
}

#[tokio::test]
async fn release_then_acquire_with_new_token() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());

    let first = manager
        .acquire("cache-warm", Duration::from_secs(10))
        .await
        .expect("should acquire");
    let first_token = first.token().clone();
    manager.release(first).await.expect("release should succeed");
    assert_eq!(holders(&stores, "cache-warm"), vec![None, None, None]);

    let second = manager
        .acquire("cache-warm", Duration::from_secs(10))
        .await
        .expect("should acquire after release");
    assert_ne!(second.token(), &first_token);
}

// -- Extend -------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stale_extend_is_rejected_with_token_mismatch() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());
    let ttl = Duration::from_secs(1);

    let mut stale = manager.acquire("job-7", ttl).await.expect("should acquire");
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(stale.state(), LockState::Expired);

    let current = manager
        .acquire("job-7", ttl)
        .await
        .expect("expired lease should be free");

    let result = manager.extend(&mut stale, ttl).await;
    assert!(matches!(result, Err(LockError::TokenMismatch { .. })));
    assert_eq!(stale.state(), LockState::Lost);

    let expected = Some(current.token().to_string());
    assert_eq!(
        holders(&stores, "job-7"),
        vec![expected.clone(), expected.clone(), expected],
        "the new holder must be untouched"
    );
}

#[tokio::test(start_paused = true)]
async fn extend_refreshes_validity() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());
    let ttl = Duration::from_secs(2);

    let mut lock = manager.acquire("report", ttl).await.expect("should acquire");
    let original = lock.validity_until();

    tokio::time::sleep(Duration::from_secs(1)).await;
    manager
        .extend(&mut lock, ttl)
        .await
        .expect("extend should succeed");
    assert!(lock.validity_until() > original);
    assert!(lock.validity_until() <= lock.acquired_at() + lock.ttl());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(lock.is_held(), "extended lease should outlive the original ttl");
    assert!(stores.iter().all(|s| s.holder("report").is_some()));
}

#[tokio::test]
async fn extend_without_quorum_fails_and_marks_lost() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());

    let mut lock = manager
        .acquire("ingest", Duration::from_secs(10))
        .await
        .expect("should acquire");
    stores[0].set_available(false);
    stores[1].set_available(false);

    let result = manager.extend(&mut lock, Duration::from_secs(10)).await;
    assert!(matches!(result, Err(LockError::ExtensionFailed { .. })));
    assert_eq!(lock.state(), LockState::Lost);
}

#[tokio::test(start_paused = true)]
async fn extend_confirmed_after_validity_window_is_rejected() {
    let stores = MemoryLockStore::cluster(3);
    let config = QuorumConfig {
        store_timeout: Some(Duration::from_secs(1)),
        ..no_retry()
    };
    let manager = manager(&stores, config);
    let ttl = Duration::from_secs(2);

    let mut lock = manager.acquire("window", ttl).await.expect("should acquire");
    let original = lock.validity_until();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(lock.is_held());
    // The round trip now outlasts what is left of the validity window.
    for store in &stores {
        store.set_latency(Duration::from_millis(600));
    }

    let started = Instant::now();
    let result = manager.extend(&mut lock, ttl).await;
    assert!(matches!(result, Err(LockError::ExtensionFailed { .. })));
    assert_eq!(lock.state(), LockState::Lost);
    assert_eq!(lock.validity_until(), original, "window must not move");
    assert!(
        Instant::now() <= original + Duration::from_millis(1),
        "extend must give up at the end of the validity window"
    );
    assert!(started.elapsed() < Duration::from_millis(600));
}

// -- Partial outages ----------------------------------------------------------

#[tokio::test]
async fn tolerates_minority_outage() {
    let stores = MemoryLockStore::cluster(5);
    let manager = manager(&stores, no_retry());
    stores[0].set_available(false);
    stores[1].set_available(false);

    let lock = manager
        .acquire("dedup", Duration::from_secs(10))
        .await
        .expect("3 of 5 stores should be enough");
    assert!(lock.is_held());
    manager.release(lock).await.expect("release should reach quorum");
}

#[tokio::test]
async fn majority_outage_fails_and_cleans_up() {
    let stores = MemoryLockStore::cluster(5);
    let manager = manager(&stores, no_retry());
    for store in &stores[..3] {
        store.set_available(false);
    }

    let result = manager.acquire("dedup", Duration::from_secs(10)).await;
    assert!(matches!(
        result,
        Err(LockError::QuorumNotReached {
            acquired: 2,
            required: 3,
            ..
        })
    ));
    assert!(
        stores[3..].iter().all(|s| s.holder("dedup").is_none()),
        "partial holds should be removed"
    );
}

#[tokio::test(start_paused = true)]
async fn slow_store_does_not_block_decision() {
    let stores = MemoryLockStore::cluster(3);
    stores[2].set_latency(Duration::from_secs(60));
    let manager = manager(&stores, no_retry());

    let started = Instant::now();
    let lock = manager
        .acquire("fast-path", Duration::from_secs(10))
        .await
        .expect("two fast stores form a quorum");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(lock.is_held());
}

// -- Validity arithmetic ------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn validity_window_accounts_for_elapsed_and_drift() {
    let stores = MemoryLockStore::cluster(3);
    for store in &stores {
        store.set_latency(Duration::from_millis(200));
    }
    let config = QuorumConfig {
        drift: DriftModel {
            factor: 0.01,
            constant: Duration::from_millis(2),
        },
        ..no_retry()
    };
    let manager = manager(&stores, config);

    let lock = manager
        .acquire("arith", Duration::from_secs(10))
        .await
        .expect("should acquire");
    assert_close(
        lock.validity_until() - lock.acquired_at(),
        Duration::from_millis(9_698),
        Duration::from_millis(5),
    );
}

#[tokio::test(start_paused = true)]
async fn consumed_margin_fails_with_validity_expired() {
    let stores = MemoryLockStore::cluster(3);
    for store in &stores {
        store.set_latency(Duration::from_millis(400));
    }
    let config = QuorumConfig {
        store_timeout: Some(Duration::from_millis(500)),
        drift: DriftModel {
            factor: 0.6,
            constant: Duration::from_millis(2),
        },
        ..no_retry()
    };
    let manager = manager(&stores, config);

    let result = manager.acquire("tight", Duration::from_secs(1)).await;
    assert!(matches!(result, Err(LockError::ValidityExpired { .. })));
    assert_eq!(holders(&stores, "tight"), vec![None, None, None]);
}

// -- Tokens and retries -------------------------------------------------------

#[tokio::test]
async fn tokens_are_unique_across_acquisitions() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());

    let mut tokens = HashSet::new();
    for _ in 0..200 {
        let lock = manager
            .acquire("churn", Duration::from_secs(10))
            .await
            .expect("should acquire");
        assert!(tokens.insert(lock.token().clone()), "token repeated");
        manager.release(lock).await.expect("release should succeed");
    }
}

/// Records when each `try_set` reaches the store.
struct RecordingStore {
    inner: MemoryLockStore,
    calls: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl LockStore for RecordingStore {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn try_set(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.inner.try_set(key, token, ttl).await
    }

    async fn compare_delete(
        &self,
        key: &str,
        token: &LockToken,
    ) -> Result<CompareOutcome, StoreError> {
        self.inner.compare_delete(key, token).await
    }

    async fn compare_extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<CompareOutcome, StoreError> {
        self.inner.compare_extend(key, token, ttl).await
    }
}

#[tokio::test(start_paused = true)]
async fn every_retry_delay_stays_within_configured_window() {
    let latency = Duration::from_millis(5);
    let stores = MemoryLockStore::cluster(3);
    for store in &stores {
        store.set_latency(latency);
    }
    let holder = manager(&stores, no_retry());
    let _held = holder
        .acquire("contended", Duration::from_secs(60))
        .await
        .expect("should acquire");

    let calls = Arc::new(Mutex::new(Vec::new()));
    let recording: Vec<DynLockStore> = stores
        .iter()
        .enumerate()
        .map(|(i, store)| {
            let calls = if i == 0 {
                Arc::clone(&calls)
            } else {
                Arc::new(Mutex::new(Vec::new()))
            };
            Arc::new(RecordingStore {
                inner: store.clone(),
                calls,
            }) as DynLockStore
        })
        .collect();
    let contender = QuorumLockManager::new(recording, no_retry()).expect("valid config");

    let retry = RetryPolicy {
        max_retries: 4,
        delay_min: Duration::from_millis(100),
        delay_max: Duration::from_millis(200),
    };
    let result = contender
        .acquire_with(
            "contended",
            Duration::from_secs(60),
            &AcquireOptions::default().retry(retry),
        )
        .await;
    assert!(matches!(result, Err(LockError::QuorumNotReached { .. })));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 5, "one initial attempt plus four retries");
    // Each gap is one refused round trip followed by one jittered delay; the
    // timer wheel may round a delay up by a millisecond.
    let upper = retry.delay_max + latency + Duration::from_millis(1);
    for pair in calls.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= retry.delay_min + latency && gap <= upper,
            "attempt gap {gap:?} outside [{:?}, {upper:?}]",
            retry.delay_min + latency
        );
    }
}

#[tokio::test(start_paused = true)]
async fn retry_succeeds_once_holder_releases() {
    let stores = MemoryLockStore::cluster(3);
    let holder = manager(&stores, no_retry());
    let lock = holder
        .acquire("handover", Duration::from_secs(60))
        .await
        .expect("should acquire");

    let waiter = manager(&stores, QuorumConfig::default());
    let handle = tokio::spawn(async move {
        waiter.acquire("handover", Duration::from_secs(60)).await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    holder.release(lock).await.expect("release should succeed");

    let acquired = handle.await.expect("task should not panic");
    assert!(acquired.is_ok(), "waiter should acquire after release");
}

// -- Deadlines and cancellation -----------------------------------------------

#[tokio::test(start_paused = true)]
async fn deadline_cleans_up_partial_holds() {
    let stores = MemoryLockStore::cluster(5);
    for store in &stores[2..] {
        store.set_latency(Duration::from_secs(2));
    }
    for store in &stores[..2] {
        store.set_latency(Duration::from_millis(10));
    }
    let manager = manager(&stores, no_retry());

    let options = AcquireOptions::default().timeout(Duration::from_millis(100));
    let result = manager
        .acquire_with("deadline", Duration::from_secs(30), &options)
        .await;

    assert!(matches!(result, Err(LockError::DeadlineExceeded { .. })));
    assert!(
        stores.iter().all(|s| s.holder("deadline").is_none()),
        "fast stores must not keep the abandoned token"
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_cleans_up_partial_holds() {
    let stores = MemoryLockStore::cluster(3);
    stores[0].set_latency(Duration::from_millis(5));
    stores[1].set_latency(Duration::from_secs(2));
    stores[2].set_latency(Duration::from_secs(2));
    let manager = manager(&stores, no_retry());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let options = AcquireOptions::default().cancel_token(cancel);
    let result = manager
        .acquire_with("cancel", Duration::from_secs(30), &options)
        .await;

    assert!(matches!(result, Err(LockError::Cancelled { .. })));
    assert_eq!(holders(&stores, "cancel"), vec![None, None, None]);
}

// -- Keep-alive and scoped leases ---------------------------------------------

#[tokio::test(start_paused = true)]
async fn keep_alive_holds_lease_past_ttl() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());

    let lock = manager
        .acquire("leader-task", Duration::from_secs(1))
        .await
        .expect("should acquire");
    let keep_alive = manager
        .keep_alive(lock, Duration::from_millis(400))
        .expect("valid interval");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!keep_alive.is_lost());
    let token = keep_alive.token().to_string();
    assert!(
        stores
            .iter()
            .all(|s| s.holder("leader-task").as_deref() == Some(token.as_str()))
    );

    keep_alive.release().await.expect("release should succeed");
    assert_eq!(holders(&stores, "leader-task"), vec![None, None, None]);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_signals_loss() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());

    let lock = manager
        .acquire("fragile", Duration::from_secs(1))
        .await
        .expect("should acquire");
    let keep_alive = manager
        .keep_alive(lock, Duration::from_millis(400))
        .expect("valid interval");

    for store in &stores {
        store.set_available(false);
    }
    tokio::time::timeout(Duration::from_secs(2), keep_alive.lost())
        .await
        .expect("loss should be signalled");
    assert!(keep_alive.is_lost());
    assert!(keep_alive.release().await.is_err());
}

#[tokio::test]
async fn keep_alive_rejects_interval_not_below_ttl() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());
    let lock = manager
        .acquire("interval", Duration::from_secs(1))
        .await
        .expect("should acquire");

    let result = manager.keep_alive(lock, Duration::from_secs(1));
    assert!(matches!(result, Err(LockError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn keep_alive_rejects_interval_beyond_remaining_validity() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());
    let lock = manager
        .acquire("narrow", Duration::from_secs(1))
        .await
        .expect("should acquire");
    assert!(lock.remaining() < Duration::from_millis(995));

    let result = manager.keep_alive(lock, Duration::from_millis(995));
    assert!(matches!(result, Err(LockError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn dropped_keep_alive_lets_lease_expire() {
    let stores = MemoryLockStore::cluster(3);
    let first = manager(&stores, no_retry());
    let lock = first
        .acquire("abandoned", Duration::from_secs(1))
        .await
        .expect("should acquire");
    let keep_alive = first
        .keep_alive(lock, Duration::from_millis(400))
        .expect("valid interval");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!keep_alive.is_lost(), "extensions run while the handle lives");
    drop(keep_alive);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let second = manager(&stores, no_retry());
    let taken = second.acquire("abandoned", Duration::from_secs(1)).await;
    assert!(taken.is_ok(), "lease should expire once its keep-alive is dropped");
}

#[tokio::test(start_paused = true)]
async fn cancelled_with_lock_lets_lease_expire() {
    let stores = MemoryLockStore::cluster(3);
    let first = manager(&stores, no_retry());

    let scoped = first.with_lock("scoped", Duration::from_secs(1), |_lease| {
        std::future::pending::<()>()
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(500), scoped).await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let second = manager(&stores, no_retry());
    let taken = second.acquire("scoped", Duration::from_secs(1)).await;
    assert!(taken.is_ok(), "lease should expire once the scoped future is dropped");
}

#[tokio::test(start_paused = true)]
async fn with_lock_runs_closure_and_releases() {
    let stores = MemoryLockStore::cluster(3);
    let manager = manager(&stores, no_retry());

    let observed = {
        let stores = stores.clone();
        manager
            .with_lock("nightly-report", Duration::from_secs(2), |lease| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                assert!(!lease.lost.is_cancelled(), "lease should be kept alive");
                (lease.token.to_string(), stores[0].holder("nightly-report"))
            })
            .await
            .expect("should acquire")
    };

    assert_eq!(Some(observed.0), observed.1);
    assert_eq!(holders(&stores, "nightly-report"), vec![None, None, None]);
}

// -- Blocking facade ----------------------------------------------------------

#[test]
fn blocking_manager_acquires_extends_and_releases() {
    let stores = MemoryLockStore::cluster(3);
    let blocking =
        BlockingLockManager::new(manager(&stores, no_retry())).expect("runtime should build");

    let mut lock = blocking
        .acquire("sync-caller", Duration::from_secs(10))
        .expect("should acquire");
    blocking
        .extend(&mut lock, Duration::from_secs(10))
        .expect("should extend");
    assert!(lock.is_held());

    let contender = blocking.acquire("sync-caller", Duration::from_secs(10));
    assert!(contender.is_err());

    blocking.release(lock).expect("should release");
    assert_eq!(holders(&stores, "sync-caller"), vec![None, None, None]);
}
