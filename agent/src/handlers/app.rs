use std::sync::Arc;

use axum::{routing, Router};
use common_metrics::setup_metrics_routes;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::build_info::BuildInfo;

use super::status;

/// Read-only state shared by every request. Nothing in here is ever mutated, so
/// handlers never contend with each other or with the heartbeat loop.
#[derive(Clone)]
pub struct AppState {
    pub build_info: Arc<BuildInfo>,
}

pub fn app(build_info: Arc<BuildInfo>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", routing::get(status::health))
        .route("/ready", routing::get(status::ready))
        .route("/version", routing::get(status::version))
        .with_state(AppState { build_info });

    setup_metrics_routes(router, metrics)
}
