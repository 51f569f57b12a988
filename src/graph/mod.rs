//! Partitioned graph API

pub mod partition;

pub use partition::PartitionedGraph;

use std::net::Ipv4Addr;

use rand::Rng;

use crate::error::Result;

/// Vertex id. Dense, bounded by the configured vertex capacity.
pub type VertexId = u32;

/// Position inside a sorted neighbor list.
pub type Index = u32;

/// Owning host of a vertex, keyed by its IPv4 address.
pub type HostId = Ipv4Addr;

/// Rank sentinel: the query cannot be answered on this host.
pub const INF: Index = Index::MAX;

/// Read-only queries over one host's shard, as used by the walk stepper
pub trait GraphStore {
    /// Number of vertices owned by this host
    fn my_vertices_count(&self) -> usize;

    /// Owned vertices in the order they were first seen during ingestion
    fn my_vertices(&self) -> Vec<VertexId>;

    /// Owning host of any vertex referenced by this shard
    fn owner_of(&self, id: VertexId) -> Result<HostId>;

    /// Out-degree; zero for vertices this host does not own
    fn degree_of(&self, id: VertexId) -> Result<Index>;

    /// Whether this host owns `id`
    fn is_local(&self, id: VertexId) -> Result<bool>;

    /// Neighbor at `index` in the sorted list of `current`.
    ///
    /// An index past the degree does not fail: a uniformly random neighbor
    /// is returned instead and the anomaly is logged and counted.
    fn neighbor_at<R: Rng + ?Sized>(
        &self,
        current: VertexId,
        index: Index,
        rng: &mut R,
    ) -> Result<VertexId>;

    /// Lower-bound position of `v` in `u`'s sorted neighbor list, or [`INF`]
    /// when `u` is owned elsewhere.
    fn neighbor_rank(&self, u: VertexId, v: VertexId) -> Result<Index>;

    /// Total number of edges ingested for this shard
    fn edge_count(&self) -> u64;
}
