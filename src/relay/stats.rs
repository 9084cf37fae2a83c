// ABOUTME: Counters describing relay activity.
// ABOUTME: Updated lock-free by the accept loop and pair tasks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live relay counters shared between the accept loop and pair tasks.
#[derive(Debug, Default)]
pub struct RelayStats {
    accepted: AtomicU64,
    accept_failures: AtomicU64,
    dial_failures: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    transfer_failures: AtomicU64,
    bytes_upstream: AtomicU64,
    bytes_downstream: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub accept_failures: u64,
    pub dial_failures: u64,
    pub active: u64,
    pub completed: u64,
    pub transfer_failures: u64,
    /// Bytes copied from local connections into remote channels.
    pub bytes_upstream: u64,
    /// Bytes copied from remote channels back to local connections.
    pub bytes_downstream: u64,
}

impl RelayStats {
    pub(crate) fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_failure(&self) {
        self.accept_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_opened(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self, upstream: u64, downstream: u64, failed: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.transfer_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_upstream.fetch_add(upstream, Ordering::Relaxed);
        self.bytes_downstream.fetch_add(downstream, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            accept_failures: self.accept_failures.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
        }
    }
}
