//! rwfleet - one node's runtime in a distributed random-walk engine
//!
//! # Architecture
//!
//! - **Partitioned graph**: each host keeps the sorted out-edges of the
//!   vertices it owns plus the owner of every vertex it references
//! - **Edge files**: per-host binary edge lists, memory-mapped at load
//! - **Fleet protocol**: datagram phase signals out, stream reports back
//! - **Barrier**: exact, deduplicated, deadline-bounded report collection
//!
//! # Usage example
//!
//! ```
//! use std::net::Ipv4Addr;
//! use rand::SeedableRng;
//! use rwfleet::{EdgeRecord, GraphStore, PartitionedGraph, INF};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host_a = Ipv4Addr::new(10, 0, 0, 1);
//! let host_b = Ipv4Addr::new(10, 0, 0, 2);
//!
//! let graph = PartitionedGraph::from_edges(
//!     vec![EdgeRecord::new(5, 9, host_b), EdgeRecord::new(5, 3, host_a)],
//!     host_a,
//!     1024,
//! )?;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! assert_eq!(graph.neighbor_at(5, 1, &mut rng)?, 9);
//! assert_eq!(graph.neighbor_rank(5, 9)?, 1);
//! assert_eq!(graph.neighbor_rank(9, 5)?, INF);
//! assert_eq!(graph.owner_of(9)?, host_b);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod protocol;
pub mod roster;
pub mod storage;
pub mod transport;
pub mod worker;

pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use graph::{GraphStore, HostId, Index, PartitionedGraph, VertexId, INF};
pub use orchestrator::{FleetOrchestrator, Phase, ResultSink, RunSummary};
pub use roster::{HostIdentity, HostRoster, WorkerEndpoint};
pub use storage::EdgeRecord;
pub use worker::{WalkDriver, WorkerResponder};
