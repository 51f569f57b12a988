//! Fleet phase driver
//!
//! ```text
//! Idle ──CACHE_GEN──► CacheFill ──START_EXP──► Running ──END_EXP──► Stopped
//!        barrier +                fire and                barrier +
//!        CACHE_READY              forget                  result sink
//! ```
//!
//! Signals go out over datagrams; completions come back over streams and
//! are counted by a [`Barrier`].

pub mod barrier;
pub mod results;

pub use barrier::{cancellation, Barrier, BarrierOutcome, CancelHandle, CancelSignal, ProtocolViolation};
pub use results::ResultSink;

use std::fmt;
use std::time::Duration;

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::protocol::{CacheReport, EndReport, Signal};
use crate::roster::{HostRoster, WorkerEndpoint};
use crate::transport::{self, open_barrier_listener, open_broadcast_socket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CacheFill,
    Running,
    Stopped,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::CacheFill => "CACHE_FILL",
            Phase::Running => "RUNNING",
            Phase::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregate of the cache-fill barrier
#[derive(Debug)]
pub struct CacheFillSummary {
    pub reports: Vec<CacheReport>,
    pub walker_sum: u64,
    pub average_walkers: f64,
    pub violations: Vec<ProtocolViolation>,
}

impl CacheFillSummary {
    pub fn from_outcome(outcome: BarrierOutcome<CacheReport>) -> Self {
        let walker_sum: u64 = outcome.reports.iter().map(|r| r.walkers as u64).sum();
        let average_walkers = if outcome.reports.is_empty() {
            0.0
        } else {
            walker_sum as f64 / outcome.reports.len() as f64
        };
        Self {
            reports: outcome.reports,
            walker_sum,
            average_walkers,
            violations: outcome.violations,
        }
    }
}

/// Aggregate of the end-of-run barrier
#[derive(Debug)]
pub struct RunSummary {
    pub reports: Vec<EndReport>,
    pub finished_sum: u64,
    pub max_elapsed_secs: f64,
    pub violations: Vec<ProtocolViolation>,
}

impl RunSummary {
    pub fn from_outcome(outcome: BarrierOutcome<EndReport>) -> Self {
        let finished_sum = outcome.reports.iter().map(|r| r.finished as u64).sum();
        let max_elapsed_secs = outcome
            .reports
            .iter()
            .map(|r| r.elapsed_secs)
            .fold(0.0, f64::max);
        Self {
            reports: outcome.reports,
            finished_sum,
            max_elapsed_secs,
            violations: outcome.violations,
        }
    }
}

/// Drives the fleet through its phases. Runs on the orchestrator node only.
pub struct FleetOrchestrator {
    config: FleetConfig,
    roster: HostRoster,
    split_num: usize,
    phase: Phase,
    cancel: CancelSignal,
}

impl FleetOrchestrator {
    pub fn new(config: FleetConfig, roster: HostRoster, cancel: CancelSignal) -> Result<Self> {
        config.validate()?;
        let split_num = config.split_num.unwrap_or(roster.len());
        if split_num == 0 {
            return Err(FleetError::Config("fleet has no workers".into()));
        }
        // fail now rather than at the first barrier
        Barrier::new(roster.split(split_num)?, None, 1)?;

        Ok(Self {
            config,
            roster,
            split_num,
            phase: Phase::Idle,
            cancel,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn split_num(&self) -> usize {
        self.split_num
    }

    pub fn participants(&self) -> &[WorkerEndpoint] {
        // validated in new()
        &self.roster.workers()[..self.split_num]
    }

    /// Send one signal datagram to every participant, sequentially
    pub async fn broadcast(&self, signal: &Signal) -> Result<()> {
        let socket = open_broadcast_socket().await?;
        for worker in self.participants() {
            transport::send_signal(&socket, worker.signal_addr(), signal, self.config.message_length)
                .await?;
            tracing::debug!("sent {} to {}", signal, worker.signal_addr());
        }
        Ok(())
    }

    /// IDLE → CACHE_FILL: broadcast, barrier, then the CACHE_READY round
    pub async fn start_cache_fill(&mut self) -> Result<CacheFillSummary> {
        self.expect_phase(Phase::Idle, Phase::CacheFill)?;
        tracing::info!("start cache");

        let sender = self.roster.identity().address;
        let outcome = self
            .barrier_round::<CacheReport>(&Signal::CacheGen { sender })
            .await?;
        let summary = CacheFillSummary::from_outcome(outcome);
        for report in &summary.reports {
            tracing::info!("worker_ip: {}, walkers: {}", report.worker, report.walkers);
        }
        tracing::info!(
            "cache fill complete: {} walkers, average {:.2}",
            summary.walker_sum,
            summary.average_walkers
        );

        self.notify_cache_ready().await;
        self.phase = Phase::CacheFill;
        Ok(summary)
    }

    /// CACHE_FILL → RUNNING: fire-and-forget START_EXP
    pub async fn start_run(&mut self, walk_count: u32) -> Result<()> {
        self.expect_phase(Phase::CacheFill, Phase::Running)?;
        tracing::info!("start ({} walks per vertex)", walk_count);

        let sender = self.roster.identity().address;
        self.broadcast(&Signal::StartExp { sender, walk_count }).await?;
        self.phase = Phase::Running;
        Ok(())
    }

    /// RUNNING → STOPPED: broadcast END_EXP and aggregate the end reports
    pub async fn stop(&mut self) -> Result<RunSummary> {
        self.expect_phase(Phase::Running, Phase::Stopped)?;
        tracing::info!("end");

        let outcome = self.barrier_round::<EndReport>(&Signal::EndExp).await?;
        let summary = RunSummary::from_outcome(outcome);
        tracing::info!("sum_end_count: {}", summary.finished_sum);
        tracing::info!("max_all_execution_time: {}", summary.max_elapsed_secs);

        self.phase = Phase::Stopped;
        Ok(summary)
    }

    /// All three phases with the configured pauses, recording into `sink`
    pub async fn run_lifecycle(&mut self, sink: &ResultSink) -> Result<RunSummary> {
        self.start_cache_fill().await?;
        self.pause(self.config.cache_settle_ms).await?;

        self.start_run(self.config.walk_count).await?;
        self.pause(self.config.run_ms).await?;

        let summary = self.stop().await?;
        sink.record(&summary)?;

        // results are persisted; an interrupted drain does not fail the run
        if let Err(e) = self.pause(self.config.drain_ms).await {
            tracing::warn!("drain interrupted: {}", e);
        }
        Ok(summary)
    }

    // Listener is bound before the signal goes out and dropped on return.
    async fn barrier_round<R: crate::protocol::Report>(
        &mut self,
        signal: &Signal,
    ) -> Result<BarrierOutcome<R>> {
        let listener =
            open_barrier_listener(self.roster.identity().address, self.config.barrier_port)?;
        let barrier = Barrier::new(
            self.participants(),
            self.config.barrier_timeout(),
            self.config.max_inflight_reports,
        )?
        .with_read_timeout(self.config.peer_timeout());

        self.broadcast(signal).await?;
        barrier.collect::<R>(&listener, &mut self.cancel).await
    }

    async fn notify_cache_ready(&self) {
        for worker in self.participants() {
            let target = worker.notify_addr();
            let notice = transport::notify(target, &Signal::CacheReady, self.config.message_length);
            if let Err(e) = transport::within(self.config.peer_timeout(), "CACHE_READY", notice).await {
                tracing::warn!("CACHE_READY to {} failed: {}", target, e);
            }
        }
    }

    async fn pause(&mut self, ms: u64) -> Result<()> {
        if ms == 0 {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
            _ = self.cancel.cancelled() => Err(FleetError::Cancelled(self.phase.name())),
        }
    }

    fn expect_phase(&self, current: Phase, next: Phase) -> Result<()> {
        if self.phase != current {
            return Err(FleetError::PhaseOrder {
                current: self.phase.name(),
                requested: next.name(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::HostIdentity;
    use std::net::Ipv4Addr;

    fn roster(n: u8) -> HostRoster {
        let workers = (1..=n)
            .map(|i| WorkerEndpoint {
                addr: Ipv4Addr::new(10, 0, 0, i),
                signal_port: 10000,
                notify_port: 9999,
            })
            .collect();
        HostRoster::new(HostIdentity::new("orch", Ipv4Addr::LOCALHOST), workers)
    }

    fn end(i: u8, finished: u32, elapsed_secs: f64) -> EndReport {
        EndReport { worker: Ipv4Addr::new(10, 0, 0, i), finished, elapsed_secs }
    }

    #[test]
    fn test_run_summary_sums_and_maxes() {
        let summary = RunSummary::from_outcome(BarrierOutcome {
            reports: vec![end(1, 10, 2.5), end(2, 20, 7.25), end(3, 5, 1.0)],
            violations: Vec::new(),
        });
        assert_eq!(summary.finished_sum, 35);
        assert_eq!(summary.max_elapsed_secs, 7.25);
    }

    #[test]
    fn test_cache_summary_average() {
        let summary = CacheFillSummary::from_outcome(BarrierOutcome {
            reports: vec![
                CacheReport { worker: Ipv4Addr::new(10, 0, 0, 1), walkers: 3 },
                CacheReport { worker: Ipv4Addr::new(10, 0, 0, 2), walkers: 4 },
                CacheReport { worker: Ipv4Addr::new(10, 0, 0, 3), walkers: 8 },
            ],
            violations: Vec::new(),
        });
        assert_eq!(summary.walker_sum, 15);
        assert_eq!(summary.average_walkers, 5.0);
    }

    #[test]
    fn test_split_num_defaults_to_roster() {
        let orch = FleetOrchestrator::new(FleetConfig::default(), roster(3), CancelSignal::never())
            .unwrap();
        assert_eq!(orch.split_num(), 3);
        assert_eq!(orch.participants().len(), 3);
        assert_eq!(orch.phase(), Phase::Idle);
    }

    #[test]
    fn test_split_num_beyond_roster_rejected() {
        let config = FleetConfig { split_num: Some(4), ..FleetConfig::default() };
        assert!(FleetOrchestrator::new(config, roster(3), CancelSignal::never()).is_err());
        assert!(FleetOrchestrator::new(FleetConfig::default(), roster(0), CancelSignal::never())
            .is_err());
    }

    #[tokio::test]
    async fn test_phases_out_of_order() {
        let mut orch =
            FleetOrchestrator::new(FleetConfig::default(), roster(2), CancelSignal::never()).unwrap();

        let err = orch.start_run(1).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::PhaseOrder { current: "IDLE", requested: "RUNNING" }
        ));
        assert!(matches!(orch.stop().await, Err(FleetError::PhaseOrder { .. })));
        assert_eq!(orch.phase(), Phase::Idle);
    }
}
