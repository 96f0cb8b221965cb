//! gatewatch-api: HTTP query layer for gatewatch.
//!
//! Exposes the latest measurement round of every registered provider.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Liveness text |
//! | GET | `/{provider}/status/json?addr=&tr=` | Health of one endpoint (JSON) |
//! | GET | `/{provider}/status?addr=&tr=` | Same as `status/json` |
//! | GET | `/{provider}/summary` | Every endpoint of the round (text) |
//! | GET | `/{provider}/round` | Round statistics (JSON) |

pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use gatewatch_health::HealthMonitor;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<HealthMonitor>,
}

/// Build the query router over every service registered in `monitor`.
pub fn build_router(monitor: Arc<HealthMonitor>) -> Router {
    let state = ApiState { monitor };

    Router::new()
        .route("/", get(handlers::index))
        .route("/{provider}/status/json", get(handlers::endpoint_status))
        .route("/{provider}/status", get(handlers::endpoint_status))
        .route("/{provider}/summary", get(handlers::round_summary))
        .route("/{provider}/round", get(handlers::round_info))
        .with_state(state)
}
