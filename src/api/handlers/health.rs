//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::api::server::AppState;
use crate::engine::SupervisorState;
use crate::probe::Latency;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "xray-helper"
        })),
    )
}

#[derive(Debug, Serialize)]
pub struct SelectedEndpoint {
    pub name: String,
    pub address: String,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: SupervisorState,
    pub endpoints: usize,
    pub selected: Vec<SelectedEndpoint>,
    pub engine_pid: Option<u32>,
    pub uptime_secs: u64,
}

/// Supervisor state and current selection
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let supervisor = &state.supervisor;

    let selected = supervisor
        .selection()
        .into_iter()
        .map(|result| SelectedEndpoint {
            name: result.endpoint.name.clone(),
            address: format!("{}:{}", result.endpoint.address, result.endpoint.port),
            latency_ms: match result.latency {
                Latency::Millis(ms) => Some(ms),
                Latency::Failed => None,
            },
        })
        .collect();

    Json(StatusResponse {
        state: supervisor.state(),
        endpoints: supervisor.endpoints().len(),
        selected,
        engine_pid: supervisor.engine_pid().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
