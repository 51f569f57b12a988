//! Static fleet membership and this host's identity

use std::collections::HashMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use sysinfo::System;

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};

/// A worker as the orchestrator addresses it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub addr: Ipv4Addr,
    pub signal_port: u16,
    pub notify_port: u16,
}

impl WorkerEndpoint {
    pub fn signal_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.addr, self.signal_port))
    }

    pub fn notify_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.addr, self.notify_port))
    }
}

/// Name and address of the running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub address: Ipv4Addr,
}

impl HostIdentity {
    pub fn new(hostname: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            hostname: hostname.into(),
            address,
        }
    }

    /// Dotted form, also the label of this host's edge file
    pub fn address_str(&self) -> String {
        self.address.to_string()
    }
}

/// Maps a network interface name to its IPv4 address
pub trait InterfaceResolver {
    fn resolve(&self, interface: &str) -> Result<Ipv4Addr>;
}

/// Resolver backed by a fixed table, normally `FleetConfig::interfaces`
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    table: HashMap<String, Ipv4Addr>,
}

impl StaticInterfaces {
    pub fn new(table: HashMap<String, Ipv4Addr>) -> Self {
        Self { table }
    }
}

impl InterfaceResolver for StaticInterfaces {
    fn resolve(&self, interface: &str) -> Result<Ipv4Addr> {
        self.table
            .get(interface)
            .copied()
            .ok_or_else(|| FleetError::Config(format!("no address for interface {}", interface)))
    }
}

/// OS hostname, if the platform reports one
pub fn local_hostname() -> Option<String> {
    System::host_name()
}

/// Parse `hostname interface` lines
pub fn parse_hostname_map(text: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for (lineno, line) in significant_lines(text) {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some(host), Some(nic)) => {
                map.insert(host.to_string(), nic.to_string());
            }
            _ => {
                return Err(FleetError::Config(format!(
                    "hostname map line {}: expected `hostname interface`, got {:?}",
                    lineno, line
                )))
            }
        }
    }
    Ok(map)
}

/// Parse worker lines: `ip` or `ip signal_port notify_port`
pub fn parse_workers(
    text: &str,
    signal_port: u16,
    notify_port: u16,
) -> Result<Vec<WorkerEndpoint>> {
    let mut workers = Vec::new();
    for (lineno, line) in significant_lines(text) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let bad = |what: &str| {
            FleetError::Config(format!("worker list line {}: {} in {:?}", lineno, what, line))
        };

        let addr: Ipv4Addr = fields[0].parse().map_err(|_| bad("bad address"))?;
        let (signal_port, notify_port) = match fields.len() {
            1 => (signal_port, notify_port),
            3 => (
                fields[1].parse().map_err(|_| bad("bad signal port"))?,
                fields[2].parse().map_err(|_| bad("bad notify port"))?,
            ),
            _ => return Err(bad("expected 1 or 3 fields")),
        };
        workers.push(WorkerEndpoint {
            addr,
            signal_port,
            notify_port,
        });
    }
    Ok(workers)
}

fn significant_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Worker list plus this host's identity. Immutable once built.
#[derive(Debug, Clone)]
pub struct HostRoster {
    identity: HostIdentity,
    workers: Vec<WorkerEndpoint>,
}

impl HostRoster {
    pub fn new(identity: HostIdentity, workers: Vec<WorkerEndpoint>) -> Self {
        Self { identity, workers }
    }

    /// Resolve identity and read the worker list from the configured files
    pub fn load<R: InterfaceResolver>(config: &FleetConfig, resolver: &R) -> Result<Self> {
        let hostname = match &config.hostname {
            Some(name) => name.clone(),
            None => local_hostname()
                .ok_or_else(|| FleetError::Config("cannot determine hostname".into()))?,
        };

        let nic_map = parse_hostname_map(&fs::read_to_string(&config.hostname_nic_path)?)?;
        let nic = nic_map.get(&hostname).ok_or_else(|| {
            FleetError::Config(format!(
                "hostname {} missing from {:?}",
                hostname, config.hostname_nic_path
            ))
        })?;
        let address = resolver.resolve(nic)?;
        tracing::info!("hostname: {}, nic: {}, address: {}", hostname, nic, address);

        let workers = parse_workers(
            &fs::read_to_string(&config.workers_path)?,
            config.signal_port,
            config.notify_port,
        )?;
        tracing::info!("Loaded {} workers from {:?}", workers.len(), config.workers_path);

        Ok(Self::new(HostIdentity::new(hostname, address), workers))
    }

    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    pub fn workers(&self) -> &[WorkerEndpoint] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The first `split_num` workers, i.e. the barrier participants
    pub fn split(&self, split_num: usize) -> Result<&[WorkerEndpoint]> {
        self.workers.get(..split_num).ok_or_else(|| {
            FleetError::Config(format!(
                "split_num {} exceeds roster of {} workers",
                split_num,
                self.workers.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_parse_workers_with_defaults_and_overrides() {
        let text = "# fleet\n10.0.0.1\n\n10.0.0.2 11000 12000\n";
        let workers = parse_workers(text, 10000, 9999).unwrap();

        assert_eq!(workers.len(), 2);
        assert_eq!(
            workers[0],
            WorkerEndpoint { addr: Ipv4Addr::new(10, 0, 0, 1), signal_port: 10000, notify_port: 9999 }
        );
        assert_eq!(workers[1].signal_addr(), "10.0.0.2:11000".parse().unwrap());
        assert_eq!(workers[1].notify_addr(), "10.0.0.2:12000".parse().unwrap());
    }

    #[test]
    fn test_parse_workers_reports_line() {
        let err = parse_workers("10.0.0.1\nnot-an-ip\n", 1, 2).unwrap_err();
        assert!(err.to_string().contains("line 2"));

        assert!(parse_workers("10.0.0.1 5\n", 1, 2).is_err());
    }

    #[test]
    fn test_parse_hostname_map() {
        let map = parse_hostname_map("node01 eth0\nnode02  ib0\n").unwrap();
        assert_eq!(map["node01"], "eth0");
        assert_eq!(map["node02"], "ib0");
        assert!(parse_hostname_map("lonely\n").is_err());
    }

    #[test]
    fn test_split() {
        let workers = parse_workers("10.0.0.1\n10.0.0.2\n10.0.0.3\n", 1, 2).unwrap();
        let roster = HostRoster::new(HostIdentity::new("orch", Ipv4Addr::LOCALHOST), workers);

        assert_eq!(roster.len(), 3);
        assert_eq!(roster.split(2).unwrap().len(), 2);
        assert_eq!(roster.split(3).unwrap().len(), 3);
        assert!(roster.split(4).is_err());
    }

    #[test]
    fn test_load_from_files() {
        let dir = TempDir::new().unwrap();
        let nic_path = dir.path().join("hostname_nic.txt");
        let workers_path = dir.path().join("server.txt");
        fs::write(&nic_path, "orch eth1\nother eth0\n").unwrap();
        fs::write(&workers_path, "10.0.0.1\n10.0.0.2\n").unwrap();

        let config = FleetConfig {
            hostname: Some("orch".into()),
            hostname_nic_path: nic_path,
            workers_path,
            ..FleetConfig::default()
        };
        let resolver = StaticInterfaces::new(HashMap::from([(
            "eth1".to_string(),
            Ipv4Addr::new(10, 0, 0, 100),
        )]));

        let roster = HostRoster::load(&config, &resolver).unwrap();
        assert_eq!(roster.identity().hostname, "orch");
        assert_eq!(roster.identity().address_str(), "10.0.0.100");
        assert_eq!(roster.workers()[1].addr, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(roster.workers()[1].signal_port, 10000);
    }

    #[test]
    fn test_load_unknown_hostname() {
        let dir = TempDir::new().unwrap();
        let nic_path = dir.path().join("hostname_nic.txt");
        fs::write(&nic_path, "someone eth0\n").unwrap();

        let config = FleetConfig {
            hostname: Some("orch".into()),
            hostname_nic_path: nic_path,
            workers_path: PathBuf::from("/nonexistent"),
            ..FleetConfig::default()
        };
        let err = HostRoster::load(&config, &StaticInterfaces::default()).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }
}
