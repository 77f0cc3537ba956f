//! Engine control endpoints
//!
//! Long operations are started in the background; the reply only confirms
//! the request was accepted.

use axum::extract::State;
use tracing::{error, info};

use crate::api::server::AppState;

pub async fn root() -> &'static str {
    "xray helper"
}

/// Re-probe the current endpoints and reload the engine
pub async fn refresh(State(state): State<AppState>) -> &'static str {
    info!("refresh requested");
    let supervisor = state.supervisor.clone();
    tokio::spawn(async move {
        if let Err(e) = supervisor.refresh().await {
            error!("refresh failed: {}", e);
        }
    });
    "xray refresh"
}

/// Reload the configuration and run the whole start sequence again
pub async fn restart(State(state): State<AppState>) -> &'static str {
    info!("restart requested");
    let supervisor = state.supervisor.clone();
    tokio::spawn(async move {
        if let Err(e) = supervisor.restart(true).await {
            error!("restart failed: {}", e);
        }
    });
    "xray ReStart"
}

pub async fn add_outbound() -> &'static str {
    "AddOutbound not support"
}

pub async fn remove_outbound() -> &'static str {
    "RemoveOutbound not support"
}
