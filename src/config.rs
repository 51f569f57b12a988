//! Fleet configuration, loaded from JSON

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::protocol::MIN_MESSAGE_LENGTH;

/// Ports, paths, timeouts and run parameters shared by orchestrator and workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Worker UDP port for phase signals
    pub signal_port: u16,

    /// Orchestrator TCP port for barrier reports
    pub barrier_port: u16,

    /// Worker TCP port for the post-cache "go" notice
    pub notify_port: u16,

    /// Fixed length of every signal datagram
    pub message_length: usize,

    /// Fleet size; defaults to the roster length
    pub split_num: Option<usize>,

    /// Barrier deadline; `None` waits forever
    pub barrier_timeout_ms: Option<u64>,

    pub max_inflight_reports: usize,

    /// Bound on a single peer connect or fixed-size read
    pub peer_timeout_ms: u64,

    pub hostname_nic_path: PathBuf,
    pub workers_path: PathBuf,

    /// Overrides the OS hostname
    pub hostname: Option<String>,

    /// Interface name -> IPv4 address
    pub interfaces: HashMap<String, Ipv4Addr>,

    pub graph_dir: PathBuf,
    pub max_vertices: usize,

    pub output_dir: PathBuf,
    pub run_name: String,

    /// Walks per vertex, sent with START_EXP
    pub walk_count: u32,

    pub cache_settle_ms: u64,
    pub run_ms: u64,
    pub drain_ms: u64,

    /// Total walkers the fleet should finish; enables the drop-rate log
    pub expected_walkers: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            signal_port: 10000,
            barrier_port: 9999,
            notify_port: 9999,
            message_length: 250,
            split_num: None,
            barrier_timeout_ms: Some(600_000),
            max_inflight_reports: 64,
            peer_timeout_ms: 5_000,
            hostname_nic_path: PathBuf::from("../config/hostname_nic.txt"),
            workers_path: PathBuf::from("../config/server.txt"),
            hostname: None,
            interfaces: HashMap::new(),
            graph_dir: PathBuf::from("../graph/"),
            max_vertices: 1 << 24,
            output_dir: PathBuf::from("../output"),
            run_name: "run".to_string(),
            walk_count: 1,
            cache_settle_ms: 15_000,
            run_ms: 0,
            drain_ms: 10_000,
            expected_walkers: None,
        }
    }
}

impl FleetConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.message_length < MIN_MESSAGE_LENGTH {
            return Err(FleetError::Config(format!(
                "message_length {} is below the minimum of {}",
                self.message_length, MIN_MESSAGE_LENGTH
            )));
        }
        if self.max_inflight_reports == 0 {
            return Err(FleetError::Config("max_inflight_reports must be positive".into()));
        }
        if self.peer_timeout_ms == 0 {
            return Err(FleetError::Config("peer_timeout_ms must be positive".into()));
        }
        if self.max_vertices == 0 {
            return Err(FleetError::Config("max_vertices must be positive".into()));
        }
        Ok(())
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn time_log_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_time.txt", self.run_name))
    }

    pub fn rerun_log_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_rerun.txt", self.run_name))
    }
}
