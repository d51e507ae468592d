use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{CompareOutcome, DynLockStore, LockStore};

/// How one store answered a single call.
#[derive(Debug)]
pub(crate) enum StoreOutcome {
    Accepted,
    Rejected,
    Mismatch,
    Unavailable(StoreError),
}

impl StoreOutcome {
    pub(crate) fn from_set(applied: bool) -> Self {
        if applied { Self::Accepted } else { Self::Rejected }
    }

    pub(crate) fn from_compare(outcome: CompareOutcome) -> Self {
        match outcome {
            CompareOutcome::Matched => Self::Accepted,
            CompareOutcome::Missing => Self::Rejected,
            CompareOutcome::Mismatch => Self::Mismatch,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Mismatch => "mismatch",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// One store's part in a manager call. Lives only as long as that call.
#[derive(Debug)]
pub(crate) struct StoreAttempt {
    pub(crate) index: usize,
    pub(crate) outcome: StoreOutcome,
    pub(crate) latency: Duration,
}

/// Whether the fan-out may stop once the outcome is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Stop as soon as more answers cannot change the decision.
    Decided,
    /// Wait for every store or its timeout.
    All,
}

/// Aggregated answers of one fan-out.
#[derive(Debug)]
pub(crate) struct Tally {
    total: usize,
    quorum: usize,
    attempts: Vec<StoreAttempt>,
}

impl Tally {
    fn new(total: usize, quorum: usize) -> Self {
        Self {
            total,
            quorum,
            attempts: Vec::with_capacity(total),
        }
    }

    pub(crate) fn accepted(&self) -> usize {
        self.count(|outcome| matches!(outcome, StoreOutcome::Accepted))
    }

    pub(crate) fn mismatched(&self) -> usize {
        self.count(|outcome| matches!(outcome, StoreOutcome::Mismatch))
    }

    pub(crate) fn reached_quorum(&self) -> bool {
        self.accepted() >= self.quorum
    }

    /// No outstanding answer can change whether quorum is reached.
    pub(crate) fn is_decided(&self) -> bool {
        let accepted = self.accepted();
        let failed = self.attempts.len() - accepted;
        accepted >= self.quorum || self.total - failed < self.quorum
    }

    /// Indices of stores that may hold the token: every store that did not
    /// answer with a definite refusal, including those never heard from.
    pub(crate) fn possibly_holding(&self) -> Vec<usize> {
        (0..self.total)
            .filter(|index| {
                !self.attempts.iter().any(|attempt| {
                    attempt.index == *index
                        && matches!(
                            attempt.outcome,
                            StoreOutcome::Rejected | StoreOutcome::Mismatch
                        )
                })
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&StoreOutcome) -> bool) -> usize {
        self.attempts
            .iter()
            .filter(|attempt| predicate(&attempt.outcome))
            .count()
    }

    fn record(&mut self, attempt: StoreAttempt) {
        self.attempts.push(attempt);
    }
}

/// Issue `op` against every store concurrently, each bounded by `deadline`.
///
/// Calls are polled from the current task; returning early drops the
/// remaining in-flight calls.
pub(crate) async fn fan_out<'s, F, Fut>(
    stores: &'s [DynLockStore],
    quorum: usize,
    deadline: Instant,
    completion: Completion,
    op: F,
) -> Tally
where
    F: Fn(&'s dyn LockStore) -> Fut,
    Fut: Future<Output = Result<StoreOutcome, StoreError>>,
{
    let mut tally = Tally::new(stores.len(), quorum);
    let mut pending: FuturesUnordered<_> = stores
        .iter()
        .enumerate()
        .map(|(index, store)| {
            let call = op(store.as_ref());
            async move {
                let started = Instant::now();
                let outcome = match tokio::time::timeout_at(deadline, call).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(err)) => StoreOutcome::Unavailable(err),
                    Err(_elapsed) => StoreOutcome::Unavailable(StoreError::Timeout(
                        deadline.saturating_duration_since(started),
                    )),
                };
                StoreAttempt {
                    index,
                    outcome,
                    latency: started.elapsed(),
                }
            }
        })
        .collect();

    while let Some(attempt) = pending.next().await {
        let store = stores[attempt.index].id();
        match &attempt.outcome {
            StoreOutcome::Unavailable(err) => debug!(
                store,
                outcome = attempt.outcome.label(),
                latency_ms = %attempt.latency.as_millis(),
                error = %err,
                "store call finished"
            ),
            outcome => debug!(
                store,
                outcome = outcome.label(),
                latency_ms = %attempt.latency.as_millis(),
                "store call finished"
            ),
        }
        tally.record(attempt);
        if completion == Completion::Decided && tally.is_decided() {
            break;
        }
    }

    tally
}
