//! In-memory shard of a partitioned graph

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rand::Rng;
use rayon::prelude::*;

use super::{GraphStore, HostId, Index, VertexId};
use crate::error::{FleetError, Result};
use crate::storage::edge_file::{edge_file_path, EdgeFile};
use crate::storage::EdgeRecord;

/// One host's shard: adjacency for owned vertices, owners for every
/// vertex the shard references.
///
/// Built once and read-only afterwards, so shared references can be
/// handed to any number of walk steppers.
pub struct PartitionedGraph {
    host_id: HostId,

    // Owned vertices, first-seen order
    my_vertices: Vec<VertexId>,

    // vertex -> owner, sized to the vertex capacity. UNSPECIFIED = unknown
    owners: Vec<HostId>,

    // vertex -> owned here, sized to the vertex capacity
    local: Vec<bool>,

    // Sorted neighbor lists, sized to max owned id + 1
    adjacency: Vec<Vec<VertexId>>,

    degree: Vec<Index>,

    edge_count: u64,

    // Out-of-range step requests served by a random neighbor
    step_anomalies: AtomicU64,
}

impl PartitionedGraph {
    /// Load `<dir>/<host_label>.data` as the shard owned by `host_id`
    pub fn init<P: AsRef<Path>>(
        dir: P,
        host_label: &str,
        host_id: HostId,
        max_vertices: usize,
    ) -> Result<Self> {
        let path = edge_file_path(dir, host_label);
        let started = Instant::now();
        let file = EdgeFile::open(&path)?;
        let graph = Self::from_edges(file.iter(), host_id, max_vertices)?;

        tracing::info!(
            "Loaded shard {:?}: {} vertices, {} edges in {:?}",
            path,
            graph.my_vertices_count(),
            graph.edge_count(),
            started.elapsed()
        );
        Ok(graph)
    }

    /// Build a shard from edge records whose `src` is owned by `host_id`
    pub fn from_edges<I>(edges: I, host_id: HostId, max_vertices: usize) -> Result<Self>
    where
        I: IntoIterator<Item = EdgeRecord>,
    {
        let mut owners = vec![Ipv4Addr::UNSPECIFIED; max_vertices];
        let mut local = vec![false; max_vertices];
        let mut adjacency: Vec<Vec<VertexId>> = Vec::new();
        let mut my_vertices = Vec::new();
        let mut edge_count = 0u64;

        for edge in edges {
            for id in [edge.src, edge.dst] {
                if id as usize >= max_vertices {
                    return Err(FleetError::InvalidFormat(format!(
                        "edge {} -> {} references vertex {} beyond capacity {}",
                        edge.src, edge.dst, id, max_vertices
                    )));
                }
            }

            let src = edge.src as usize;
            owners[src] = host_id;
            owners[edge.dst as usize] = edge.dst_owner;

            if adjacency.len() <= src {
                adjacency.resize_with(src + 1, Vec::new);
            }
            adjacency[src].push(edge.dst);

            if !local[src] {
                local[src] = true;
                my_vertices.push(edge.src);
            }
            edge_count += 1;
        }

        adjacency.par_iter_mut().for_each(|list| list.sort_unstable());
        let degree = adjacency.iter().map(|list| list.len() as Index).collect();

        Ok(Self {
            host_id,
            my_vertices,
            owners,
            local,
            adjacency,
            degree,
            edge_count,
            step_anomalies: AtomicU64::new(0),
        })
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    /// Capacity of the owner table
    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    /// Sorted neighbors of an owned vertex; empty for anything else
    pub fn neighbors(&self, id: VertexId) -> Result<&[VertexId]> {
        self.check(id)?;
        Ok(self
            .adjacency
            .get(id as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    /// How many step requests were served by the random fallback
    pub fn step_anomalies(&self) -> u64 {
        self.step_anomalies.load(Ordering::Relaxed)
    }

    fn check(&self, id: VertexId) -> Result<()> {
        if (id as usize) < self.owners.len() {
            Ok(())
        } else {
            Err(FleetError::VertexOutOfRange {
                id,
                capacity: self.owners.len(),
            })
        }
    }
}

impl GraphStore for PartitionedGraph {
    fn my_vertices_count(&self) -> usize {
        self.my_vertices.len()
    }

    fn my_vertices(&self) -> Vec<VertexId> {
        self.my_vertices.clone()
    }

    fn owner_of(&self, id: VertexId) -> Result<HostId> {
        self.check(id)?;
        let owner = self.owners[id as usize];
        if owner.is_unspecified() {
            return Err(FleetError::OwnerNotFound(id));
        }
        Ok(owner)
    }

    fn degree_of(&self, id: VertexId) -> Result<Index> {
        self.check(id)?;
        Ok(self.degree.get(id as usize).copied().unwrap_or(0))
    }

    fn is_local(&self, id: VertexId) -> Result<bool> {
        self.check(id)?;
        Ok(self.local[id as usize])
    }

    fn neighbor_at<R: Rng + ?Sized>(
        &self,
        current: VertexId,
        index: Index,
        rng: &mut R,
    ) -> Result<VertexId> {
        let neighbors = self.neighbors(current)?;
        if let Some(&next) = neighbors.get(index as usize) {
            return Ok(next);
        }
        if neighbors.is_empty() {
            return Err(FleetError::NoNeighbors(current));
        }

        self.step_anomalies.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            vertex = current,
            index,
            degree = neighbors.len(),
            "step index past degree, substituting a random neighbor"
        );
        Ok(neighbors[rng.gen_range(0..neighbors.len())])
    }

    fn neighbor_rank(&self, u: VertexId, v: VertexId) -> Result<Index> {
        if !self.is_local(u)? {
            tracing::debug!(vertex = u, "rank query for vertex owned elsewhere");
            return Ok(super::INF);
        }
        let neighbors = &self.adjacency[u as usize];
        Ok(neighbors.partition_point(|&n| n < v) as Index)
    }

    fn edge_count(&self) -> u64 {
        self.edge_count
    }
}
