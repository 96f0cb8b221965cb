//! gatewatch-health: gateway health probing for gatewatch.
//!
//! Runs rounds of reachability probes against the gateways a provider
//! publishes, and keeps the two most recent rounds for lookups.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   └── HealthService (one per provider)
//!       ├── Round loop: run_round() then sleep(interval)
//!       │   └── Checker::run(tx) → Measurement stream
//!       │       └── VpnChecker: Semaphore-bounded probe tasks
//!       │           └── TunnelProbe: establish → measure → teardown
//!       └── current / previous MeasurementBatch (swapped on publish)
//! ```
//!
//! # Rounds
//!
//! A round probes every eligible endpoint (unobfuscated, capped by
//! `max_endpoints`) with at most `max_concurrent` probes in flight. An
//! endpoint is healthy when its packet loss is strictly below
//! `health_threshold`. The completed batch replaces the current one and
//! the old current batch becomes the previous one in a single swap, so
//! readers never observe a partial round.

pub mod batch;
pub mod checker;
pub mod error;
pub mod monitor;
pub mod service;
pub mod tunnel;

pub use batch::MeasurementBatch;
pub use checker::{classify, select_candidates, Checker, VpnChecker};
pub use error::{HealthError, HealthResult};
pub use monitor::HealthMonitor;
pub use service::{HealthService, RoundInfo};
pub use tunnel::{ConnectParams, Protocol, SocketProbe, TunnelError, TunnelProbe};
