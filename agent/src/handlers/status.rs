use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::build_info::BuildInfo;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
}

/// Always healthy: answering at all is the liveness signal.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: state.build_info.version.clone(),
    })
}

pub async fn ready() -> Json<ReadyResponse> {
    Json(ReadyResponse { status: "ready" })
}

pub async fn version(State(state): State<AppState>) -> Json<BuildInfo> {
    Json(BuildInfo::clone(&state.build_info))
}
