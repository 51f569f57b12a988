//! Per-host edge files

pub mod edge_file;

use std::net::Ipv4Addr;

pub use edge_file::{EdgeFile, EdgeFileWriter};

use crate::graph::VertexId;

/// Directed edge as stored in a host's edge file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    /// Source vertex, owned by the host whose file holds this record
    pub src: VertexId,

    /// Target vertex, possibly owned elsewhere
    pub dst: VertexId,

    /// Owner of `dst`
    pub dst_owner: Ipv4Addr,
}

impl EdgeRecord {
    pub fn new(src: VertexId, dst: VertexId, dst_owner: Ipv4Addr) -> Self {
        Self { src, dst, dst_owner }
    }
}
