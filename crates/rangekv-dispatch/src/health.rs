//! Cached per-address reachability verdicts.
//!
//! Feeds the health partition that orders dispatch candidates. Records
//! are updated by whoever observes call outcomes; reads never block and
//! never perform I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Thresholds for flipping an address between healthy and unhealthy.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before an address is flagged unhealthy (default: 3).
    pub failure_threshold: u32,
    /// Consecutive successes before a flagged address recovers (default: 2).
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

/// Failure/recovery counters for a single address.
///
/// Thread-safe; shared between the tracker and any observer holding a
/// reference.
#[derive(Debug, Default)]
pub struct AddressHealth {
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    unhealthy: AtomicBool,
}

impl AddressHealth {
    /// Records a successful call against this address.
    pub fn record_success(&self, config: &HealthConfig) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= config.recovery_threshold {
            self.unhealthy.store(false, Ordering::Relaxed);
        }
    }

    /// Records a failed call against this address.
    pub fn record_failure(&self, config: &HealthConfig) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= config.failure_threshold {
            self.unhealthy.store(true, Ordering::Relaxed);
        }
    }

    /// Current cached verdict.
    pub fn is_healthy(&self) -> bool {
        !self.unhealthy.load(Ordering::Relaxed)
    }

    /// Number of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Number of consecutive successes.
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }
}

/// Registry of cached health verdicts keyed by peer address.
///
/// Addresses with no recorded history are treated as healthy.
pub struct HealthTracker {
    config: HealthConfig,
    entries: RwLock<HashMap<String, Arc<AddressHealth>>>,
}

impl HealthTracker {
    /// Creates a tracker with default thresholds.
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Creates a tracker with custom thresholds.
    pub fn with_config(config: HealthConfig) -> Self {
        HealthTracker {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, addr: &str) -> Arc<AddressHealth> {
        if let Some(entry) = self.entries.read().unwrap().get(addr) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().unwrap();
        Arc::clone(entries.entry(addr.to_string()).or_default())
    }

    /// Records a successful call against the address.
    pub fn record_success(&self, addr: &str) {
        self.entry(addr).record_success(&self.config);
    }

    /// Records a failed call against the address.
    pub fn record_failure(&self, addr: &str) {
        self.entry(addr).record_failure(&self.config);
    }

    /// Cached verdict for the address; unknown addresses are healthy.
    pub fn is_healthy(&self, addr: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(addr)
            .map(|entry| entry.is_healthy())
            .unwrap_or(true)
    }

    /// Returns the thresholds in effect.
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap();
        f.debug_struct("HealthTracker")
            .field("addresses", &entries.len())
            .finish()
    }
}
