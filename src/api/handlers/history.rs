use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use serde_json::{Map, Value};

use super::common::{ok, ApiResult};
use crate::core::types::HistoryPage;
use crate::features::history::DEFAULT_PAGE_SIZE;
use crate::tools::validate::history_rules;
use crate::AppState;

fn paging(params: &HashMap<String, String>) -> (usize, usize) {
    let read = |key: &str| params.get(key).and_then(|v| v.trim().parse::<usize>().ok());
    (read("limit").unwrap_or(DEFAULT_PAGE_SIZE), read("offset").unwrap_or(0))
}

/// `GET /api/history?limit&offset`
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<HistoryPage> {
    let doc: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    history_rules().validate(&Value::Object(doc))?;

    let (limit, offset) = paging(&params);
    ok(state.history.page(limit, offset).await)
}
