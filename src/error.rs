//! Error types for the shard store and fleet protocol

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::graph::VertexId;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Vertex {id} out of range (capacity {capacity})")]
    VertexOutOfRange { id: VertexId, capacity: usize },

    #[error("No owner recorded for vertex {0}")]
    OwnerNotFound(VertexId),

    #[error("Vertex {0} has no local neighbors")]
    NoNeighbors(VertexId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Phase {requested} requested while in {current}")]
    PhaseOrder {
        current: &'static str,
        requested: &'static str,
    },

    #[error("Barrier timed out: {} reported, missing {:?}", reported.len(), missing)]
    BarrierTimeout {
        reported: BTreeSet<Ipv4Addr>,
        missing: BTreeSet<Ipv4Addr>,
    },

    #[error("Cancelled during {0}")]
    Cancelled(&'static str),

    #[error("Barrier cancelled: {} reported, missing {:?}", reported.len(), missing)]
    BarrierCancelled {
        reported: BTreeSet<Ipv4Addr>,
        missing: BTreeSet<Ipv4Addr>,
    },
}
