//! HTTP surface: route table, feature gates and limiter wiring.

pub mod gate;
pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::config::Feature;
use crate::features::rate_limit;
use crate::AppState;
use handlers::{auth, crawl, export, health, history, parse, query, sources};

// Multipart framing on top of the file itself.
const MULTIPART_SLACK_BYTES: usize = 64 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let flags = state.config.features;
    let limiters = state.limiters.clone();

    let parse_routes = Router::new()
        .route("/api/parse", post(parse::parse_document))
        .route("/api/parse/parsers", get(parse::list_parsers))
        .layer(DefaultBodyLimit::max(
            state.config.parsers.max_upload_bytes + MULTIPART_SLACK_BYTES,
        ))
        .route_layer(middleware::from_fn_with_state(
            (flags, Feature::OcrParsing),
            gate::require_feature,
        ));

    let crawl_routes = Router::new()
        .route("/api/crawl", post(crawl::start_crawl))
        .route("/api/crawl/types", get(crawl::crawler_types))
        .route("/api/crawl/{job_id}", get(crawl::job_status))
        .route_layer(middleware::from_fn_with_state(
            (flags, Feature::Crawling),
            gate::require_feature,
        ));

    // The gate is outermost so a disabled feature never spends quota.
    let query_routes = Router::new()
        .route("/api/query", post(query::submit_query))
        .route("/api/query/validate", post(query::validate_query))
        .route_layer(middleware::from_fn_with_state(
            limiters.query.clone(),
            rate_limit::enforce,
        ))
        .route_layer(middleware::from_fn_with_state(
            (flags, Feature::NlQuery),
            gate::require_feature,
        ));

    let login_route = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(
            limiters.auth.clone(),
            rate_limit::enforce,
        ));

    let api = Router::new()
        .merge(parse_routes)
        .merge(crawl_routes)
        .merge(query_routes)
        .merge(login_route)
        .route("/api/auth/verify", get(auth::verify))
        .route("/api/auth/me", get(auth::me))
        .route("/api/export", post(export::export_data))
        .route("/api/history", get(history::list_history))
        .route("/api/sources", get(sources::list_sources))
        .route("/api/health", get(health::health))
        .layer(middleware::from_fn_with_state(
            limiters.general.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/health", get(health::liveness))
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
