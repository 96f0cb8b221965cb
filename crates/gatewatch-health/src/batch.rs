//! Measurement batches: the results of one round.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use gatewatch_core::{epoch_secs, measurement_key, Measurement};

use crate::error::{HealthError, HealthResult};

/// All measurements of one completed round, keyed by `<addr>/<transport>`.
///
/// A batch is filled while its round runs and is read-only once published.
#[derive(Debug, Clone, Default)]
pub struct MeasurementBatch {
    health_map: HashMap<String, Measurement>,
    /// Wall-clock time the round took.
    pub time_in_round: Duration,
    /// Unix timestamp (seconds) of when the round finished.
    pub completed_at: u64,
}

impl MeasurementBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a measurement. A later measurement with the same key replaces the earlier one.
    pub fn insert(&mut self, m: Measurement) {
        self.health_map.insert(m.key(), m);
    }

    /// Stamp the batch as complete.
    pub fn finish(&mut self, time_in_round: Duration) {
        self.time_in_round = time_in_round;
        self.completed_at = epoch_secs();
    }

    /// Whether `addr` over `transport` was healthy in this round.
    pub fn healthy(&self, addr: &SocketAddr, transport: &str) -> HealthResult<bool> {
        let key = measurement_key(addr, transport);
        match self.health_map.get(&key) {
            Some(m) => Ok(m.healthy),
            None => Err(HealthError::UnknownEntity(key)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Measurement> {
        self.health_map.get(key)
    }

    pub fn len(&self) -> usize {
        self.health_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.health_map.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.health_map.values().filter(|m| m.healthy).count()
    }

    pub fn recovered_count(&self) -> usize {
        self.health_map.values().filter(|m| m.recovered).count()
    }

    /// Measurements sorted by key, descending.
    pub fn measurements(&self) -> Vec<&Measurement> {
        let mut mm: Vec<&Measurement> = self.health_map.values().collect();
        mm.sort_by(|a, b| b.key().cmp(&a.key()));
        mm
    }

    /// One `<addr>/<transport>: <healthy>` line per measurement.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for m in self.measurements() {
            let _ = writeln!(out, "{m}: {}", m.healthy);
        }
        out
    }

    /// Flag entries that are healthy now but were unhealthy in `previous`.
    pub fn mark_recovered(&mut self, previous: &MeasurementBatch) {
        for (key, m) in self.health_map.iter_mut() {
            m.recovered = m.healthy && previous.get(key).is_some_and(|p| !p.healthy);
        }
    }
}
