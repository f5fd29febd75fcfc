//! Identifiers for ranges, nodes, and replicas.

use serde::{Deserialize, Serialize};

/// Unique identifier for a range of the keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RangeId(u64);

impl RangeId {
    /// Creates a new RangeId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        RangeId(id)
    }

    /// Returns the underlying u64 value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for RangeId {
    fn from(id: u64) -> Self {
        RangeId(id)
    }
}

impl From<RangeId> for u64 {
    fn from(id: RangeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Unique identifier for a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a new NodeId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Returns the underlying u64 value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier for one replica of a range, distinct from its node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReplicaId(u32);

impl ReplicaId {
    /// Creates a new ReplicaId from a raw u32 value.
    pub fn new(id: u32) -> Self {
        ReplicaId(id)
    }

    /// Returns the underlying u32 value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for ReplicaId {
    fn from(id: u32) -> Self {
        ReplicaId(id)
    }
}

impl From<ReplicaId> for u32 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica{}", self.0)
    }
}

/// One candidate replica of a range: where it lives and which copy it is.
///
/// Supplied by the caller at transport construction and immutable for the
/// transport's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    /// Node hosting the replica.
    pub node_id: NodeId,
    /// Identity of this copy within the range.
    pub replica_id: ReplicaId,
    /// Network address the replica is reachable at.
    pub addr: String,
}

impl ReplicaDescriptor {
    /// Creates a descriptor for a replica at the given address.
    pub fn new(node_id: NodeId, replica_id: ReplicaId, addr: impl Into<String>) -> Self {
        ReplicaDescriptor {
            node_id,
            replica_id,
            addr: addr.into(),
        }
    }
}
