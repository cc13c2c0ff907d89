use std::sync::Arc;

use axum::extract::State;
use chrono::Utc;

use super::common::{ok, ApiResult};
use crate::core::types::ApiSourceSummary;
use crate::AppState;

/// `GET /api/sources`: active sources with their usable key counts.
pub async fn list_sources(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ApiSourceSummary>> {
    ok(state.sources.summaries(Utc::now()))
}
