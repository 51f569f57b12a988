//! Report collection at a phase barrier
//!
//! A barrier completes once every participant has delivered exactly one
//! valid report. Reports from unknown senders, second reports from the same
//! worker, and unreadable connections are recorded as violations and not
//! counted. Collection ends early on the deadline or on cancellation.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{FleetError, Result};
use crate::protocol::Report;
use crate::roster::WorkerEndpoint;
use crate::transport::{accept_one, read_report, within};

/// Per-connection read bound unless overridden
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Sender half of a cancellation pair
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Receiver half; cheap to clone into every phase
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is gone.
    pub async fn cancelled(&mut self) {
        let closed = self.0.wait_for(|c| *c).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// A report that was received but not counted
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    /// Second report claiming an address that already reported
    Duplicate { worker: Ipv4Addr, peer: SocketAddr },

    /// Claimed address is not a barrier participant
    UnexpectedSender { worker: Ipv4Addr, peer: SocketAddr },

    /// Connection closed early or carried garbage
    Unreadable { peer: SocketAddr, error: String },
}

#[derive(Debug)]
pub struct BarrierOutcome<R> {
    /// One report per participant, in arrival order
    pub reports: Vec<R>,
    pub violations: Vec<ProtocolViolation>,
}

pub struct Barrier {
    expected: BTreeSet<Ipv4Addr>,
    timeout: Option<Duration>,
    read_timeout: Duration,
    max_inflight: usize,
}

impl Barrier {
    pub fn new(
        participants: &[WorkerEndpoint],
        timeout: Option<Duration>,
        max_inflight: usize,
    ) -> Result<Self> {
        let expected: BTreeSet<Ipv4Addr> = participants.iter().map(|w| w.addr).collect();
        if expected.len() != participants.len() {
            return Err(FleetError::Config(
                "barrier participants must have distinct addresses".into(),
            ));
        }
        Ok(Self {
            expected,
            timeout,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_inflight: max_inflight.max(1),
        })
    }

    /// Connections that have not delivered a full report within `limit`
    /// are dropped as unreadable, freeing their in-flight slot
    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = limit;
        self
    }

    pub fn expected(&self) -> &BTreeSet<Ipv4Addr> {
        &self.expected
    }

    /// Drain reports from `listener` until every participant reported
    pub async fn collect<R: Report>(
        &self,
        listener: &TcpListener,
        cancel: &mut CancelSignal,
    ) -> Result<BarrierOutcome<R>> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut reported = BTreeSet::new();
        let mut reports = Vec::with_capacity(self.expected.len());
        let mut violations = Vec::new();
        let mut reads: JoinSet<(SocketAddr, Result<R>)> = JoinSet::new();

        while reported.len() < self.expected.len() {
            tracing::debug!("waiting for reports ({}/{})", reported.len(), self.expected.len());

            tokio::select! {
                accepted = accept_one(listener), if reads.len() < self.max_inflight => {
                    let (mut stream, peer) = accepted?;
                    tracing::debug!("connection from {}", peer);
                    let limit = self.read_timeout;
                    reads.spawn(async move {
                        let report = within(limit, "report read", read_report::<R>(&mut stream)).await;
                        (peer, report)
                    });
                }
                Some(joined) = reads.join_next() => {
                    let (peer, result) = joined
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                    match result {
                        Ok(report) => {
                            if let Some(violation) = self.admit(&report, peer, &mut reported) {
                                tracing::warn!("barrier protocol violation: {:?}", violation);
                                violations.push(violation);
                            } else {
                                reports.push(report);
                            }
                        }
                        Err(e) => {
                            tracing::warn!("unreadable report from {}: {}", peer, e);
                            violations.push(ProtocolViolation::Unreadable {
                                peer,
                                error: e.to_string(),
                            });
                        }
                    }
                }
                _ = wait_until(deadline) => {
                    let missing = self.missing(&reported);
                    tracing::error!("barrier deadline passed, missing {:?}", missing);
                    return Err(FleetError::BarrierTimeout { reported, missing });
                }
                _ = cancel.cancelled() => {
                    let missing = self.missing(&reported);
                    tracing::warn!("barrier cancelled, missing {:?}", missing);
                    return Err(FleetError::BarrierCancelled { reported, missing });
                }
            }
        }

        Ok(BarrierOutcome { reports, violations })
    }

    fn admit<R: Report>(
        &self,
        report: &R,
        peer: SocketAddr,
        reported: &mut BTreeSet<Ipv4Addr>,
    ) -> Option<ProtocolViolation> {
        let worker = report.worker();
        if !self.expected.contains(&worker) {
            return Some(ProtocolViolation::UnexpectedSender { worker, peer });
        }
        if !reported.insert(worker) {
            return Some(ProtocolViolation::Duplicate { worker, peer });
        }
        tracing::debug!("report from worker {} via {}", worker, peer);
        None
    }

    fn missing(&self, reported: &BTreeSet<Ipv4Addr>) -> BTreeSet<Ipv4Addr> {
        self.expected.difference(reported).copied().collect()
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CacheReport;
    use crate::transport::{open_barrier_listener, send_report};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn participants(n: u8) -> Vec<WorkerEndpoint> {
        (1..=n)
            .map(|i| WorkerEndpoint {
                addr: Ipv4Addr::new(10, 0, 0, i),
                signal_port: 10000,
                notify_port: 9999,
            })
            .collect()
    }

    fn report(i: u8, walkers: u32) -> CacheReport {
        CacheReport { worker: Ipv4Addr::new(10, 0, 0, i), walkers }
    }

    #[tokio::test]
    async fn test_completes_after_all_reports() {
        let listener = open_barrier_listener(Ipv4Addr::LOCALHOST, 0).unwrap();
        let target = listener.local_addr().unwrap();
        let barrier = Barrier::new(&participants(3), Some(Duration::from_secs(10)), 8).unwrap();

        for (i, walkers) in [(1, 10), (2, 20), (3, 30)] {
            tokio::spawn(async move { send_report(target, &report(i, walkers)).await.unwrap() });
        }

        let outcome: BarrierOutcome<CacheReport> =
            barrier.collect(&listener, &mut CancelSignal::never()).await.unwrap();
        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.violations.is_empty());
        let total: u32 = outcome.reports.iter().map(|r| r.walkers).sum();
        assert_eq!(total, 60);
    }

    #[tokio::test]
    async fn test_blocks_until_last_report() {
        let listener = open_barrier_listener(Ipv4Addr::LOCALHOST, 0).unwrap();
        let target = listener.local_addr().unwrap();
        let barrier = Barrier::new(&participants(3), None, 8).unwrap();

        send_report(target, &report(1, 1)).await.unwrap();
        send_report(target, &report(2, 2)).await.unwrap();
        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            send_report(target, &report(3, 3)).await.unwrap();
        });

        let outcome = barrier
            .collect::<CacheReport>(&listener, &mut CancelSignal::never())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(outcome.reports.len(), 3);
        assert_eq!(outcome.reports.last().unwrap().worker, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_starve_reports() {
        let listener = open_barrier_listener(Ipv4Addr::LOCALHOST, 0).unwrap();
        let target = listener.local_addr().unwrap();
        let barrier = Barrier::new(&participants(2), Some(Duration::from_secs(5)), 1)
            .unwrap()
            .with_read_timeout(Duration::from_millis(100));

        // connected first and never writes
        let _idle = TcpStream::connect(target).await.unwrap();
        send_report(target, &report(1, 4)).await.unwrap();
        send_report(target, &report(2, 6)).await.unwrap();

        let outcome = barrier
            .collect::<CacheReport>(&listener, &mut CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.violations.len(), 1);
        assert!(matches!(outcome.violations[0], ProtocolViolation::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_duplicates_and_strangers_not_counted() {
        let listener = open_barrier_listener(Ipv4Addr::LOCALHOST, 0).unwrap();
        let target = listener.local_addr().unwrap();
        let barrier = Barrier::new(&participants(2), Some(Duration::from_secs(10)), 1).unwrap();

        send_report(target, &report(1, 5)).await.unwrap();
        send_report(target, &report(1, 5)).await.unwrap();
        send_report(target, &report(9, 5)).await.unwrap();
        {
            let mut stray = TcpStream::connect(target).await.unwrap();
            stray.write_all(b"hi").await.unwrap();
        }
        send_report(target, &report(2, 7)).await.unwrap();

        let outcome = barrier
            .collect::<CacheReport>(&listener, &mut CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.violations.len(), 3);
        assert!(outcome
            .violations
            .iter()
            .any(|v| matches!(v, ProtocolViolation::Duplicate { worker, .. } if *worker == Ipv4Addr::new(10, 0, 0, 1))));
        assert!(outcome
            .violations
            .iter()
            .any(|v| matches!(v, ProtocolViolation::UnexpectedSender { .. })));
        assert!(outcome
            .violations
            .iter()
            .any(|v| matches!(v, ProtocolViolation::Unreadable { .. })));
    }

    #[tokio::test]
    async fn test_timeout_names_missing_workers() {
        let listener = open_barrier_listener(Ipv4Addr::LOCALHOST, 0).unwrap();
        let target = listener.local_addr().unwrap();
        let barrier = Barrier::new(&participants(3), Some(Duration::from_millis(300)), 8).unwrap();

        send_report(target, &report(2, 1)).await.unwrap();

        let err = barrier
            .collect::<CacheReport>(&listener, &mut CancelSignal::never())
            .await
            .unwrap_err();
        match err {
            FleetError::BarrierTimeout { reported, missing } => {
                assert_eq!(reported, BTreeSet::from([Ipv4Addr::new(10, 0, 0, 2)]));
                assert_eq!(
                    missing,
                    BTreeSet::from([Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 3)])
                );
            }
            other => panic!("expected BarrierTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation() {
        let listener = open_barrier_listener(Ipv4Addr::LOCALHOST, 0).unwrap();
        let barrier = Barrier::new(&participants(2), None, 8).unwrap();
        let (handle, mut signal) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let err = barrier.collect::<CacheReport>(&listener, &mut signal).await.unwrap_err();
        assert!(matches!(err, FleetError::BarrierCancelled { .. }));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_rejects_shared_addresses() {
        let mut workers = participants(2);
        workers[1].addr = workers[0].addr;
        assert!(Barrier::new(&workers, None, 8).is_err());
    }
}
