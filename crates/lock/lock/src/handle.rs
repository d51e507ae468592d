use std::time::Duration;

use tokio::time::Instant;

use crate::clock;
use crate::token::LockToken;

/// Build the key for `id` inside `namespace` (`"{namespace}.{id}"`).
pub fn resource_key(namespace: &str, id: &str) -> String {
    format!("{namespace}.{id}")
}

/// Observable state of a [`Lock`].
///
/// A lock value only exists once acquisition succeeded, and releasing it
/// consumes it, so the remaining states are all a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The validity window is still open.
    Held,
    /// The validity window has passed without a successful extension.
    Expired,
    /// The manager observed that the lease is no longer ours.
    Lost,
}

/// A lease held on a quorum of stores.
///
/// Owned by exactly one caller. It is deliberately not `Clone`; use
/// [`Lock::handoff`] to move a lease to another task or process.
#[derive(Debug)]
pub struct Lock {
    resource: String,
    token: LockToken,
    acquired_at: Instant,
    ttl: Duration,
    validity_until: Instant,
    lost: bool,
}

impl Lock {
    pub(crate) fn new(
        resource: &str,
        token: LockToken,
        acquired_at: Instant,
        ttl: Duration,
        validity: Duration,
    ) -> Self {
        Self {
            resource: resource.to_owned(),
            token,
            acquired_at,
            ttl,
            validity_until: acquired_at + validity.min(ttl),
            lost: false,
        }
    }

    /// The protected resource key.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Ownership proof; pass it to the protected resource as a fencing token.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Start of the round trip that granted or last extended the lease.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// TTL requested from the stores.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Instant after which the lease must no longer be relied upon.
    pub fn validity_until(&self) -> Instant {
        self.validity_until
    }

    /// Time left in the validity window.
    pub fn remaining(&self) -> Duration {
        self.validity_until.saturating_duration_since(clock::now())
    }

    /// Current state.
    pub fn state(&self) -> LockState {
        if self.lost {
            LockState::Lost
        } else if clock::now() >= self.validity_until {
            LockState::Expired
        } else {
            LockState::Held
        }
    }

    /// Whether the caller may still act as the exclusive owner.
    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    /// Prepare the lease for transfer to another owner.
    pub fn handoff(self) -> LockHandoff {
        LockHandoff {
            remaining: self.remaining(),
            resource: self.resource,
            token: self.token,
            ttl: self.ttl,
        }
    }

    pub(crate) fn renew(&mut self, started: Instant, ttl: Duration, validity: Duration) {
        self.acquired_at = started;
        self.ttl = ttl;
        self.validity_until = started + validity.min(ttl);
    }

    pub(crate) fn mark_lost(&mut self) {
        self.lost = true;
    }
}

/// Everything a new owner needs to take over a lease.
///
/// The receiver's window is only as conservative as `remaining` is, so any
/// transport delay should be subtracted from it before calling
/// [`LockHandoff::into_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandoff {
    pub resource: String,
    pub token: LockToken,
    pub ttl: Duration,
    pub remaining: Duration,
}

impl LockHandoff {
    /// Rebuild the lease on the receiving side.
    pub fn into_lock(self) -> Lock {
        Lock::new(
            &self.resource,
            self.token,
            clock::now(),
            self.ttl,
            self.remaining,
        )
    }
}
