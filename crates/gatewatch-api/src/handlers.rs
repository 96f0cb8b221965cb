//! HTTP query handlers.
//!
//! Each handler resolves the provider's `HealthService` from the monitor and
//! answers from its current batch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gatewatch_health::{HealthError, HealthService};
use tracing::{debug, warn};

use crate::ApiState;

/// Transport assumed when a status query omits `tr`.
const DEFAULT_TRANSPORT: &str = "udp";

/// Response wrapper for the round route and for errors on JSON routes.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &HealthError) -> StatusCode {
    match err {
        HealthError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        HealthError::UnknownEntity(_) => StatusCode::NOT_FOUND,
        HealthError::UnknownProtocol(_) => StatusCode::BAD_REQUEST,
    }
}

fn lookup(state: &ApiState, provider: &str) -> Option<Arc<HealthService>> {
    let service = state.monitor.get(provider).cloned();
    if service.is_none() {
        warn!(%provider, "query for unknown provider");
    }
    service
}

/// One entry of the status response.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ActionResult {
    pub action: String,
    pub result: bool,
}

/// Query string of the status routes.
#[derive(Debug, Default, serde::Deserialize)]
pub struct StatusQuery {
    pub addr: Option<String>,
    pub tr: Option<String>,
}

/// GET /
pub async fn index() -> &'static str {
    "nothing to see here"
}

/// GET /{provider}/status/json and /{provider}/status
pub async fn endpoint_status(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let Some(service) = lookup(&state, &provider) else {
        return error_response("unknown provider", StatusCode::BAD_REQUEST);
    };

    let raw = match query.addr.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.to_string(),
        _ => {
            warn!(%provider, "status query without addr");
            return error_response("missing param: addr", StatusCode::BAD_REQUEST);
        }
    };
    let addr: SocketAddr = match raw.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(%provider, addr = %raw, error = %e, "status query with invalid addr");
            return error_response(&format!("invalid addr {raw:?}: {e}"), StatusCode::BAD_REQUEST);
        }
    };
    let transport = query.tr.as_deref().filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TRANSPORT);

    match service.healthy(&addr, transport).await {
        Ok(healthy) => {
            debug!(%provider, key = %format!("{addr}/{transport}"), healthy, "status query");
            Json(vec![ActionResult {
                action: "healthy".to_string(),
                result: healthy,
            }])
            .into_response()
        }
        Err(e) => {
            warn!(%provider, %addr, transport, error = %e, "status query failed");
            error_response(&e.to_string(), status_for(&e))
        }
    }
}

/// GET /{provider}/summary
pub async fn round_summary(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
) -> impl IntoResponse {
    let Some(service) = lookup(&state, &provider) else {
        return (StatusCode::BAD_REQUEST, "unknown provider\n".to_string()).into_response();
    };

    match service.summary().await {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(%provider, error = %e, "summary query failed");
            let msg = match &e {
                HealthError::NotReady => "try again later".to_string(),
                other => other.to_string(),
            };
            (status_for(&e), format!("{msg}\n")).into_response()
        }
    }
}

/// GET /{provider}/round
pub async fn round_info(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
) -> impl IntoResponse {
    let Some(service) = lookup(&state, &provider) else {
        return error_response("unknown provider", StatusCode::BAD_REQUEST);
    };

    match service.round_info().await {
        Ok(info) => ApiResponse::ok(info).into_response(),
        Err(e) => {
            warn!(%provider, error = %e, "round query failed");
            error_response(&e.to_string(), status_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::to_bytes;
    use gatewatch_core::{Measurement, ProbeSettings, TunnelSettings};
    use gatewatch_health::{HealthMonitor, MeasurementBatch, SocketProbe, VpnChecker};

    fn gw(i: u8) -> SocketAddr {
        SocketAddr::from(([203, 0, 113, i], 1194))
    }

    fn test_service() -> Arc<HealthService> {
        let checker =
            VpnChecker::new(None, SocketProbe, ProbeSettings::default(), TunnelSettings::default());
        Arc::new(HealthService::new("riseup", Arc::new(checker), Duration::from_secs(600)))
    }

    fn test_state(service: &Arc<HealthService>) -> ApiState {
        let mut monitor = HealthMonitor::new();
        monitor.register(Arc::clone(service));
        ApiState {
            monitor: Arc::new(monitor),
        }
    }

    async fn publish_round(service: &HealthService) {
        let mut batch = MeasurementBatch::new();
        batch.insert(Measurement::new(gw(1), "udp", true));
        batch.insert(Measurement::new(gw(2), "udp", false));
        batch.insert(Measurement::new(gw(1), "tcp", false));
        service.publish(batch).await;
    }

    fn query(addr: Option<&str>, tr: Option<&str>) -> Query<StatusQuery> {
        Query(StatusQuery {
            addr: addr.map(str::to_string),
            tr: tr.map(str::to_string),
        })
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn index_text() {
        assert_eq!(index().await, "nothing to see here");
    }

    #[tokio::test]
    async fn status_reports_health() {
        let service = test_service();
        publish_round(&service).await;
        let state = test_state(&service);

        let resp = endpoint_status(
            State(state.clone()),
            Path("riseup".to_string()),
            query(Some("203.0.113.1:1194"), Some("udp")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let results: Vec<ActionResult> = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(
            results,
            vec![ActionResult {
                action: "healthy".to_string(),
                result: true
            }]
        );

        let resp = endpoint_status(
            State(state),
            Path("riseup".to_string()),
            query(Some("203.0.113.1:1194"), Some("tcp")),
        )
        .await
        .into_response();
        let results: Vec<ActionResult> = serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(!results[0].result);
    }

    #[tokio::test]
    async fn status_defaults_to_udp() {
        let service = test_service();
        publish_round(&service).await;

        let resp = endpoint_status(
            State(test_state(&service)),
            Path("riseup".to_string()),
            query(Some("203.0.113.2:1194"), None),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("\"result\":false"));
    }

    #[tokio::test]
    async fn status_before_first_round_is_unavailable() {
        let service = test_service();
        let resp = endpoint_status(
            State(test_state(&service)),
            Path("riseup".to_string()),
            query(Some("203.0.113.1:1194"), Some("udp")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_string(resp).await.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn status_unknown_endpoint_is_not_found() {
        let service = test_service();
        publish_round(&service).await;
        let resp = endpoint_status(
            State(test_state(&service)),
            Path("riseup".to_string()),
            query(Some("203.0.113.9:1194"), Some("udp")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_rejects_bad_requests() {
        let service = test_service();
        publish_round(&service).await;
        let state = test_state(&service);

        for (provider, addr) in [
            ("calyx", Some("203.0.113.1:1194")),
            ("riseup", None),
            ("riseup", Some("")),
            ("riseup", Some("not-an-addr")),
            ("riseup", Some("203.0.113.1")),
        ] {
            let resp = endpoint_status(
                State(state.clone()),
                Path(provider.to_string()),
                query(addr, Some("udp")),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{provider} {addr:?}");
        }
    }

    #[tokio::test]
    async fn summary_is_plain_text() {
        let service = test_service();
        publish_round(&service).await;

        let resp = round_summary(State(test_state(&service)), Path("riseup".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
        assert_eq!(
            body_string(resp).await,
            "203.0.113.2:1194/udp: false\n\
             203.0.113.1:1194/udp: true\n\
             203.0.113.1:1194/tcp: false\n"
        );
    }

    #[tokio::test]
    async fn summary_errors() {
        let service = test_service();
        let state = test_state(&service);

        let resp = round_summary(State(state.clone()), Path("riseup".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(resp).await, "try again later\n");

        let resp = round_summary(State(state), Path("calyx".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn round_info_json() {
        let service = test_service();
        let state = test_state(&service);

        let resp = round_info(State(state.clone()), Path("riseup".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        publish_round(&service).await;
        let resp = round_info(State(state), Path("riseup".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["success"], true);
        let info = &body["data"];
        assert_eq!(info["provider"], "riseup");
        assert_eq!(info["measured"], 3);
        assert_eq!(info["healthy"], 1);
        assert_eq!(info["recovered"], 0);
    }
}
