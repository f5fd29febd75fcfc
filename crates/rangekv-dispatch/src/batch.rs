//! Batch request and response types for range-addressed KV operations.
//!
//! A batch is cloned once per candidate replica with that replica's
//! descriptor stamped in, so every attempt carries correct routing
//! metadata. Messages are serialized with bincode at the wire boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::replica::{RangeId, ReplicaDescriptor};

/// Serialize any serde-compatible message to bytes using bincode.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| DispatchError::SerializationError(e.to_string()))
}

/// Deserialize bytes to a message using bincode.
pub fn deserialize_message<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| DispatchError::SerializationError(e.to_string()))
}

/// One operation within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Point read of a key.
    Get {
        /// Key to read.
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
    /// Write of a key/value pair.
    Put {
        /// Key to write.
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        /// Value to store.
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    /// Removal of a key.
    Delete {
        /// Key to remove.
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
}

/// A logical, possibly multi-operation request against one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Range the batch is addressed to.
    pub range_id: RangeId,
    /// Replica the attempt is routed to; stamped per candidate at
    /// transport construction.
    pub replica: ReplicaDescriptor,
    /// Operations in the batch, executed in order.
    pub ops: Vec<BatchOp>,
}

impl BatchRequest {
    /// Creates a request template for a range. The replica descriptor is
    /// left default until a per-candidate copy is stamped.
    pub fn new(range_id: RangeId, ops: Vec<BatchOp>) -> Self {
        BatchRequest {
            range_id,
            replica: ReplicaDescriptor::default(),
            ops,
        }
    }

    /// Clones the template with the candidate's descriptor stamped in.
    pub fn for_replica(&self, replica: &ReplicaDescriptor) -> BatchRequest {
        let mut copy = self.clone();
        copy.replica = replica.clone();
        copy
    }
}

/// Result of one operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    /// Value read by a Get; `None` if the key was absent.
    Value {
        /// The stored value, if any.
        value: Option<Vec<u8>>,
    },
    /// Acknowledgement of a Put or Delete.
    Done,
}

/// Error reported by the replica inside a reply, as opposed to a failure
/// of the call itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    /// Human-readable failure detail.
    pub message: String,
}

impl ReplyError {
    /// Creates a reply error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        ReplyError {
            message: message.into(),
        }
    }
}

impl From<&DispatchError> for ReplyError {
    fn from(err: &DispatchError) -> Self {
        ReplyError {
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Reply to a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Per-operation results, in request order.
    pub results: Vec<OpResult>,
    /// Replica-reported error. At most one of this and the attempt-level
    /// error channel is populated for any outcome.
    pub error: Option<ReplyError>,
}

impl BatchResponse {
    /// Creates a successful response carrying the given results.
    pub fn with_results(results: Vec<OpResult>) -> Self {
        BatchResponse {
            results,
            error: None,
        }
    }
}
