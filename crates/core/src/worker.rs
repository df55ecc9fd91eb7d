// SPDX-License-Identifier: MIT

//! Worker and node identifiers.

crate::define_id! {
    /// Identifies a worker execution unit within the pool.
    pub struct WorkerId;
}

crate::define_id! {
    /// Identifies a cluster node participating in Raft.
    pub struct NodeId;
}
