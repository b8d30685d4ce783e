use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use pkg_types::status::LeaderStatus;
use tracing::{debug, error};

use crate::AppState;

/// GET /healthz — liveness only; never touches the lease store.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /api/v1/leader — fresh leadership answer for this instance.
pub async fn leader_status(State(state): State<AppState>) -> impl IntoResponse {
    let elector = &state.elector;
    let status = LeaderStatus {
        identity: elector.identity().to_string(),
        lease: elector.key().name.clone(),
        namespace: elector.key().namespace.clone(),
        backend: elector.backend().to_string(),
        leader: elector.is_leader().await,
    };
    debug!("Serving leader status (leader={})", status.leader);
    (StatusCode::OK, Json(status))
}

/// GET /api/v1/lease — the lease record as currently stored.
pub async fn current_lease(State(state): State<AppState>) -> impl IntoResponse {
    match state.elector.current().await {
        Ok(Some(lease)) => (StatusCode::OK, Json(lease)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "lease not found").into_response(),
        Err(e) => {
            error!("Failed to read lease {}: {:#}", state.elector.key(), e);
            (StatusCode::BAD_GATEWAY, "lease store unavailable").into_response()
        }
    }
}

/// GET /metrics — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.elector.metrics().render(),
    )
}
