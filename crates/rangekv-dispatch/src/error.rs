use thiserror::Error;

/// Errors produced by transport construction and individual dispatch attempts.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No connection handle could be acquired for a candidate address.
    /// Fails transport construction as a whole.
    #[error("failed to acquire connection to {addr}")]
    AcquireFailed {
        /// Address of the offending candidate.
        addr: String,
    },

    /// The candidate replica list was empty.
    #[error("no candidate replicas for batch")]
    NoReplicas,

    /// The connection reached `Shutdown` before the call could be issued.
    #[error("batch to {addr} failed as the connection was closed")]
    ConnectionClosed {
        /// Address of the replica being attempted.
        addr: String,
    },

    /// The attempt did not complete before its deadline.
    #[error("attempt to {addr} timed out after {timeout_ms}ms")]
    DeadlineExceeded {
        /// Address of the replica being attempted.
        addr: String,
        /// Configured per-attempt timeout.
        timeout_ms: u64,
    },

    /// The connection's state stream ended while waiting for a transition.
    #[error("connection state watch closed")]
    StateWatchClosed,

    /// The batch call itself failed at the replica or on the wire.
    #[error("batch call failed: {message}")]
    CallFailed {
        /// Failure detail from the call primitive.
        message: String,
    },

    /// Message encoding or decoding failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A collaborator broke its contract. Programmer fault, not an
    /// environmental condition; callers must not retry past it.
    #[error("collaborator contract violation: {reason}")]
    ContractViolation {
        /// What the collaborator did wrong.
        reason: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
