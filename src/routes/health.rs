// src/routes/health.rs
//! Store health check endpoint for the water importer.
//!
//! This module defines the `/health` route used by container orchestrators
//! and the Home Assistant supervisor to verify that the service can reach
//! InfluxDB. It follows the Explicit Module Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler and response type
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::store::{check_health, HealthStatus};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Handle `GET /health`.
///
/// Opens a store session, pings it and closes it. A failing store is
/// reported as `unhealthy` with the reason; it never aborts the request.
async fn health(State(store): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    match check_health(store.as_ref()).await {
        HealthStatus::Healthy => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                error: None,
            }),
        ),
        HealthStatus::Unhealthy(reason) => {
            tracing::warn!(%reason, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse {
                    status: "unhealthy",
                    error: Some(reason),
                }),
            )
        }
    }
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
