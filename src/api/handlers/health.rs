use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::json;

use super::common::{ok, ApiResult};
use crate::core::config::FeatureFlags;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub features: FeatureFlags,
}

/// `GET /health`: liveness only, outside the API limiters.
pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /api/health`
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthReport> {
    ok(HealthReport {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        environment: format!("{:?}", state.config.environment).to_lowercase(),
        features: state.config.features,
    })
}
