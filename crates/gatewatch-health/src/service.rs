//! Health service: schedules rounds for one provider and answers lookups
//! against the latest completed round.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gatewatch_core::Measurement;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::MeasurementBatch;
use crate::checker::Checker;
use crate::error::{HealthError, HealthResult};

/// Capacity of the channel between probe tasks and the round collector.
const RESULT_CHANNEL_CAPACITY: usize = 64;

/// The two most recent published rounds.
#[derive(Default)]
struct Batches {
    current: Option<Arc<MeasurementBatch>>,
    previous: Option<Arc<MeasurementBatch>>,
}

/// Statistics about the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundInfo {
    pub provider: String,
    pub measured: usize,
    pub healthy: usize,
    pub recovered: usize,
    pub time_in_round_ms: u64,
    pub completed_at: u64,
}

/// Runs health-check rounds for one provider.
pub struct HealthService {
    /// Provider/entity this service is associated with.
    name: String,
    checker: Arc<dyn Checker>,
    interval: Duration,
    batches: RwLock<Batches>,
    /// Held for the whole of a round, so rounds and swaps never overlap.
    round_gate: Mutex<()>,
}

impl HealthService {
    pub fn new(name: &str, checker: Arc<dyn Checker>, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            checker,
            interval,
            batches: RwLock::new(Batches::default()),
            round_gate: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checker(&self) -> &Arc<dyn Checker> {
        &self.checker
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether `addr` over `transport` was healthy in the latest round.
    ///
    /// `NotReady` until a round has completed; `UnknownEntity` when the
    /// endpoint was not part of that round.
    pub async fn healthy(&self, addr: &SocketAddr, transport: &str) -> HealthResult<bool> {
        let current = self.current().await.ok_or(HealthError::NotReady)?;
        current.healthy(addr, transport)
    }

    pub async fn current(&self) -> Option<Arc<MeasurementBatch>> {
        self.batches.read().await.current.clone()
    }

    pub async fn previous(&self) -> Option<Arc<MeasurementBatch>> {
        self.batches.read().await.previous.clone()
    }

    pub async fn summary(&self) -> HealthResult<String> {
        let current = self.current().await.ok_or(HealthError::NotReady)?;
        Ok(current.summary())
    }

    pub async fn round_info(&self) -> HealthResult<RoundInfo> {
        let current = self.current().await.ok_or(HealthError::NotReady)?;
        Ok(RoundInfo {
            provider: self.name.clone(),
            measured: current.len(),
            healthy: current.healthy_count(),
            recovered: current.recovered_count(),
            time_in_round_ms: current.time_in_round.as_millis() as u64,
            completed_at: current.completed_at,
        })
    }

    /// Publish a completed batch: the current batch becomes the previous one.
    pub async fn publish(&self, mut batch: MeasurementBatch) -> Arc<MeasurementBatch> {
        let mut batches = self.batches.write().await;
        if let Some(old) = &batches.current {
            batch.mark_recovered(old);
        }
        let batch = Arc::new(batch);
        batches.previous = batches.current.replace(Arc::clone(&batch));
        batch
    }

    /// Run one round to completion and publish its batch.
    ///
    /// A round that cannot run still publishes an empty batch.
    pub async fn run_round(&self) -> Arc<MeasurementBatch> {
        let _gate = self.round_gate.lock().await;
        info!(
            provider = %self.name,
            kind = self.checker.kind(),
            proto = self.checker.proto(),
            "launching health-check round"
        );

        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel::<Measurement>(RESULT_CHANNEL_CAPACITY);
        let collect = async {
            let mut batch = MeasurementBatch::new();
            while let Some(m) = rx.recv().await {
                debug!(provider = %self.name, key = %m, healthy = m.healthy, "measured");
                batch.insert(m);
            }
            batch
        };

        let (outcome, mut batch) = tokio::join!(self.checker.run(tx), collect);
        if let Err(e) = outcome {
            warn!(provider = %self.name, error = %e, "round produced no measurements");
        }

        batch.finish(start.elapsed());
        info!(
            provider = %self.name,
            measured = batch.len(),
            healthy = batch.healthy_count(),
            elapsed_ms = batch.time_in_round.as_millis() as u64,
            "finished measurement round"
        );
        self.publish(batch).await
    }

    /// Spawn the round loop: a round, then `interval` of rest, until shutdown.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            debug!(provider = %service.name, interval = ?service.interval, "round loop starting");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                service.run_round().await;

                tokio::select! {
                    _ = tokio::time::sleep(service.interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            debug!(provider = %service.name, "round loop shutting down");
        })
    }
}
