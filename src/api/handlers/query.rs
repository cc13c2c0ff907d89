use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::common::{json_body, ok, typed, ApiResult};
use crate::core::error::ApiError;
use crate::core::types::ParsedQuery;
use crate::features::sources::SourceRegistry;
use crate::tools::query::parse_query;
use crate::tools::validate::{parsed_query_rules, query_rules, sanitize_query};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAccepted {
    pub history_id: Uuid,
    pub query: String,
    pub parsed: ParsedQuery,
}

#[derive(Debug, Serialize)]
pub struct QueryValidation {
    pub valid: bool,
    pub parsed: ParsedQuery,
}

/// `POST /api/query`
pub async fn submit_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<QueryAccepted> {
    let body = json_body(body)?;
    let raw = match body.get("query") {
        Some(Value::String(s)) => Value::String(sanitize_query(s)),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    query_rules().validate(&json!({ "query": raw }))?;
    let query = raw.as_str().unwrap_or_default().to_string();

    let parsed = parse_query(&query);
    info!(
        intent = ?parsed.intent,
        confidence = parsed.confidence,
        "parsed natural-language query"
    );
    let entry = state.history.record(&query, parsed).await;
    ok(QueryAccepted {
        history_id: entry.id,
        query: entry.query,
        parsed: entry.parsed,
    })
}

fn check_source(parsed: &ParsedQuery, sources: &SourceRegistry) -> Result<(), ApiError> {
    if sources.is_empty() {
        return Ok(());
    }
    match parsed.source.as_ref() {
        Some(source) if sources.get(&source.api).is_some_and(|s| s.is_active) => Ok(()),
        Some(source) => Err(ApiError::validation(
            "source.api",
            format!("Unknown or inactive data source '{}'", source.api),
        )),
        None => Err(ApiError::validation("source", "source is required")),
    }
}

/// `POST /api/query/validate`
pub async fn validate_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<QueryValidation> {
    let body = json_body(body)?;
    parsed_query_rules().validate(&body)?;
    let parsed: ParsedQuery = typed(body)?;
    check_source(&parsed, &state.sources)?;
    ok(QueryValidation {
        valid: true,
        parsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{QueryIntent, QueryOutputFormat, SourceDescriptor};

    fn parsed(api: &str) -> ParsedQuery {
        ParsedQuery {
            intent: QueryIntent::Statistics,
            confidence: 0.8,
            source: Some(SourceDescriptor {
                api: api.to_string(),
                dataset: None,
            }),
            filters: Default::default(),
            output_format: QueryOutputFormat::Table,
        }
    }

    #[test]
    fn empty_registry_accepts_any_source() {
        assert!(check_source(&parsed("anything"), &SourceRegistry::empty()).is_ok());
    }
}
