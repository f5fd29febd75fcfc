//! Dispatch metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of dispatch metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchMetricsSnapshot {
    /// Transports constructed by the factory.
    pub transports_created: u64,
    /// Transports explicitly closed.
    pub transports_closed: u64,
    /// Attempts dequeued for dispatch.
    pub attempts_started: u64,
    /// Attempts served by the in-process fast path.
    pub local_attempts: u64,
    /// Attempts dispatched over a connection.
    pub remote_attempts: u64,
    /// Outcomes delivered carrying a reply.
    pub replies_delivered: u64,
    /// Outcomes delivered carrying an attempt error.
    pub errors_delivered: u64,
    /// Attempts that hit their deadline.
    pub deadline_exceeded: u64,
}

/// Thread-safe dispatch metrics collector.
pub struct DispatchMetrics {
    transports_created: AtomicU64,
    transports_closed: AtomicU64,
    attempts_started: AtomicU64,
    local_attempts: AtomicU64,
    remote_attempts: AtomicU64,
    replies_delivered: AtomicU64,
    errors_delivered: AtomicU64,
    deadline_exceeded: AtomicU64,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl DispatchMetrics {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transports_created: AtomicU64::new(0),
            transports_closed: AtomicU64::new(0),
            attempts_started: AtomicU64::new(0),
            local_attempts: AtomicU64::new(0),
            remote_attempts: AtomicU64::new(0),
            replies_delivered: AtomicU64::new(0),
            errors_delivered: AtomicU64::new(0),
            deadline_exceeded: AtomicU64::new(0),
        }
    }

    /// Increments the transports created counter.
    pub fn inc_transports_created(&self) {
        self.transports_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the transports closed counter.
    pub fn inc_transports_closed(&self) {
        self.transports_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the attempts started counter.
    pub fn inc_attempts_started(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the local fast-path attempts counter.
    pub fn inc_local_attempts(&self) {
        self.local_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the remote attempts counter.
    pub fn inc_remote_attempts(&self) {
        self.remote_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the replies delivered counter.
    pub fn inc_replies_delivered(&self) {
        self.replies_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the error outcomes counter.
    pub fn inc_errors_delivered(&self) {
        self.errors_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the deadline exceeded counter.
    pub fn inc_deadline_exceeded(&self) {
        self.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            transports_created: self.transports_created.load(Ordering::Relaxed),
            transports_closed: self.transports_closed.load(Ordering::Relaxed),
            attempts_started: self.attempts_started.load(Ordering::Relaxed),
            local_attempts: self.local_attempts.load(Ordering::Relaxed),
            remote_attempts: self.remote_attempts.load(Ordering::Relaxed),
            replies_delivered: self.replies_delivered.load(Ordering::Relaxed),
            errors_delivered: self.errors_delivered.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
        }
    }
}
