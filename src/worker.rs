//! Worker side of the fleet protocol
//!
//! Every non-orchestrator node runs a [`WorkerResponder`]: it waits for
//! phase signals, hands them to its [`WalkDriver`], and reports back to the
//! orchestrator's barrier when a phase needs it.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::orchestrator::CancelSignal;
use crate::protocol::{CacheReport, EndReport, Signal};
use crate::roster::WorkerEndpoint;
use crate::transport::{self, open_barrier_listener, open_signal_socket};

/// The walk execution engine a worker drives. Calls are made on the
/// protocol task, so long work belongs on the driver's own threads.
pub trait WalkDriver: Send {
    /// Generate walkers to warm caches; returns how many were generated
    fn fill_cache(&mut self) -> u32;

    /// Every worker finished filling
    fn cache_ready(&mut self) {}

    fn start(&mut self, walk_count: u32);

    /// Stop walking; returns finished walkers and elapsed seconds
    fn stop(&mut self) -> (u32, f64);
}

pub struct WorkerResponder<D> {
    address: Ipv4Addr,
    barrier_port: u16,
    message_length: usize,
    peer_timeout: Duration,
    signals: UdpSocket,
    notices: TcpListener,
    orchestrator: Option<Ipv4Addr>,
    driver: D,
}

impl<D: WalkDriver> WorkerResponder<D> {
    /// Bind the signal and notice ports on `address`
    pub async fn bind(address: Ipv4Addr, config: &FleetConfig, driver: D) -> Result<Self> {
        let signals = open_signal_socket(address, config.signal_port).await?;
        let notices = open_barrier_listener(address, config.notify_port)?;
        tracing::info!(
            "worker {} listening for signals on {}",
            address,
            signals.local_addr()?
        );

        Ok(Self {
            address,
            barrier_port: config.barrier_port,
            message_length: config.message_length,
            peer_timeout: config.peer_timeout(),
            signals,
            notices,
            orchestrator: None,
            driver,
        })
    }

    /// How the orchestrator's roster should list this worker
    pub fn endpoint(&self) -> Result<WorkerEndpoint> {
        Ok(WorkerEndpoint {
            addr: self.address,
            signal_port: self.signals.local_addr()?.port(),
            notify_port: self.notices.local_addr()?.port(),
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Serve signals until the run's END_EXP has been answered
    pub async fn run(mut self, mut cancel: CancelSignal) -> Result<D> {
        loop {
            let (decoded, from) = tokio::select! {
                received = transport::recv_signal(&self.signals) => received?,
                _ = cancel.cancelled() => return Err(FleetError::Cancelled("worker")),
            };

            let signal = match decoded {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("dropping malformed signal from {}: {}", from, e);
                    continue;
                }
            };

            if self.handle(signal, from, &mut cancel).await? {
                return Ok(self.driver);
            }
        }
    }

    /// React to one signal; `true` once the run is over
    async fn handle(
        &mut self,
        signal: Signal,
        from: SocketAddr,
        cancel: &mut CancelSignal,
    ) -> Result<bool> {
        tracing::info!("received {}", signal);
        match signal {
            Signal::CacheGen { sender } => {
                self.orchestrator = Some(sender);
                let walkers = self.driver.fill_cache();
                let report = CacheReport { worker: self.address, walkers };
                transport::send_report(self.report_target(sender), &report).await?;
                self.await_cache_ready(cancel).await?;
                self.driver.cache_ready();
                Ok(false)
            }
            Signal::StartExp { sender, walk_count } => {
                self.orchestrator = Some(sender);
                self.driver.start(walk_count);
                Ok(false)
            }
            Signal::EndExp => {
                let orchestrator = self.orchestrator.unwrap_or(match from {
                    SocketAddr::V4(v4) => *v4.ip(),
                    SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                });
                let (finished, elapsed_secs) = self.driver.stop();
                let report = EndReport { worker: self.address, finished, elapsed_secs };
                transport::send_report(self.report_target(orchestrator), &report).await?;
                Ok(true)
            }
            Signal::CacheReady => {
                tracing::warn!("CACHE_READY arrived as a datagram from {}, ignoring", from);
                Ok(false)
            }
        }
    }

    async fn await_cache_ready(&mut self, cancel: &mut CancelSignal) -> Result<()> {
        loop {
            let (mut stream, peer) = tokio::select! {
                accepted = transport::accept_one(&self.notices) => accepted?,
                _ = cancel.cancelled() => return Err(FleetError::Cancelled("cache fill")),
            };
            let read = transport::within(
                self.peer_timeout,
                "notice read",
                transport::read_notice(&mut stream, self.message_length),
            );
            let notice = tokio::select! {
                notice = read => notice,
                _ = cancel.cancelled() => return Err(FleetError::Cancelled("cache fill")),
            };
            match notice {
                Ok(Signal::CacheReady) => return Ok(()),
                Ok(other) => tracing::warn!("unexpected notice {} from {}", other, peer),
                Err(e) => tracing::warn!("unreadable notice from {}: {}", peer, e),
            }
        }
    }

    fn report_target(&self, orchestrator: Ipv4Addr) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(orchestrator, self.barrier_port))
    }
}
