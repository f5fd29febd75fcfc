//! Connection-provider boundary consumed by the dispatch transport.
//!
//! The transport borrows connection handles owned by a provider; it never
//! establishes or pools connections itself. A provider also answers
//! whether an address is served by the current process, returning the
//! in-process handler used by the local fast path.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::batch::{BatchRequest, BatchResponse};
use crate::error::{DispatchError, Result};

/// Observable lifecycle state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No connection attempt in progress.
    Idle,
    /// Connection establishment in progress.
    Connecting,
    /// Connection is usable for calls.
    Ready,
    /// Connection is temporarily broken and will be retried by its owner.
    TransientFailure,
    /// Connection is permanently closed.
    Shutdown,
}

/// A borrowed handle to one peer connection.
#[async_trait]
pub trait RangeConnection: Send + Sync {
    /// Current cached state. Never performs I/O.
    fn state(&self) -> ConnState;

    /// Suspends until the state differs from `observed`, returning the new
    /// state. Errors if state transitions can no longer be observed.
    async fn wait_state_change(&self, observed: ConnState) -> Result<ConnState>;

    /// Issues the batch call over this connection.
    async fn send_batch(&self, request: &BatchRequest) -> Result<BatchResponse>;

    /// Remote peer address of this connection.
    fn peer_addr(&self) -> &str;
}

impl std::fmt::Debug for dyn RangeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeConnection")
            .field("peer_addr", &self.peer_addr())
            .field("state", &self.state())
            .finish()
    }
}

/// In-process batch execution, used when the target replica is colocated
/// with the caller.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Executes the batch and produces a reply.
    async fn handle(&self, request: BatchRequest) -> Result<BatchResponse>;
}

/// Source of connection handles and cached health verdicts.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Returns a handle for the given address, or an acquisition error
    /// identifying the address.
    async fn acquire(&self, addr: &str) -> Result<Arc<dyn RangeConnection>>;

    /// Cached verdict on whether the address is believed reachable.
    /// Never performs I/O.
    fn is_healthy(&self, addr: &str) -> bool;

    /// Returns the in-process handler if the address is served by the
    /// current process.
    fn local_handler(&self, addr: &str) -> Option<Arc<dyn BatchHandler>>;
}

/// Watch-backed state holder for connection implementations.
///
/// Readers observe the current state without blocking and can suspend
/// until it changes; no spinning.
#[derive(Debug)]
pub struct ConnStateCell {
    tx: watch::Sender<ConnState>,
}

impl ConnStateCell {
    /// Creates a cell holding the given initial state.
    pub fn new(initial: ConnState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        ConnStateCell { tx }
    }

    /// Returns the current state.
    pub fn get(&self) -> ConnState {
        *self.tx.borrow()
    }

    /// Publishes a new state, waking any waiters.
    pub fn set(&self, state: ConnState) {
        self.tx.send_replace(state);
    }

    /// Suspends until the state differs from `observed`.
    pub async fn wait_change(&self, observed: ConnState) -> Result<ConnState> {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current != observed {
                return Ok(current);
            }
            rx.changed()
                .await
                .map_err(|_| DispatchError::StateWatchClosed)?;
        }
    }
}
