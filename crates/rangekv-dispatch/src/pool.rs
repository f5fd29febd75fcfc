//! In-memory directory of peer connections, health state, and colocated
//! handlers.
//!
//! `PeerDirectory` is the provided [`ConnectionProvider`]: connection
//! handles are registered by whatever owns establishment (out of scope
//! here) and borrowed by transports per attempt. It also registers the
//! in-process handlers that back the local fast path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::conn::{BatchHandler, ConnState, ConnectionProvider, RangeConnection};
use crate::error::{DispatchError, Result};
use crate::health::{HealthConfig, HealthTracker};

/// Directory statistics.
#[derive(Debug, Clone)]
pub struct DirectoryStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of registered in-process handlers.
    pub local_handlers: usize,
}

/// Registry of connection handles and in-process handlers keyed by address.
pub struct PeerDirectory {
    connections: RwLock<HashMap<String, Arc<dyn RangeConnection>>>,
    handlers: RwLock<HashMap<String, Arc<dyn BatchHandler>>>,
    health: HealthTracker,
}

impl PeerDirectory {
    /// Creates an empty directory with default health thresholds.
    pub fn new() -> Self {
        Self::with_health_config(HealthConfig::default())
    }

    /// Creates an empty directory with custom health thresholds.
    pub fn with_health_config(config: HealthConfig) -> Self {
        PeerDirectory {
            connections: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            health: HealthTracker::with_config(config),
        }
    }

    /// Registers (or replaces) the connection handle for an address.
    pub fn register_connection(&self, addr: impl Into<String>, conn: Arc<dyn RangeConnection>) {
        self.connections.write().unwrap().insert(addr.into(), conn);
    }

    /// Registers the in-process handler serving an address.
    pub fn register_local_handler(&self, addr: impl Into<String>, handler: Arc<dyn BatchHandler>) {
        self.handlers.write().unwrap().insert(addr.into(), handler);
    }

    /// Removes all state for a peer.
    pub fn remove_peer(&self, addr: &str) {
        self.connections.write().unwrap().remove(addr);
        self.handlers.write().unwrap().remove(addr);
    }

    /// Health records for registered peers.
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Directory statistics.
    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            connections: self.connections.read().unwrap().len(),
            local_handlers: self.handlers.read().unwrap().len(),
        }
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PeerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("PeerDirectory")
            .field("connections", &stats.connections)
            .field("local_handlers", &stats.local_handlers)
            .finish()
    }
}

#[async_trait]
impl ConnectionProvider for PeerDirectory {
    async fn acquire(&self, addr: &str) -> Result<Arc<dyn RangeConnection>> {
        self.connections
            .read()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| DispatchError::AcquireFailed {
                addr: addr.to_string(),
            })
    }

    fn is_healthy(&self, addr: &str) -> bool {
        // A connection already observed in a terminal or failing state is
        // unhealthy regardless of call history.
        let state_ok = self
            .connections
            .read()
            .unwrap()
            .get(addr)
            .map(|conn| {
                !matches!(
                    conn.state(),
                    ConnState::Shutdown | ConnState::TransientFailure
                )
            })
            .unwrap_or(true);
        state_ok && self.health.is_healthy(addr)
    }

    fn local_handler(&self, addr: &str) -> Option<Arc<dyn BatchHandler>> {
        self.handlers.read().unwrap().get(addr).cloned()
    }
}
