use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use super::common::{json_body, ok, typed, ApiResult};
use crate::core::error::ApiError;
use crate::core::types::{ApiSuccess, CrawlRequest, Job, JobStatus, JobType};
use crate::crawlers::{CrawlerType, CrawlerTypeInfo};
use crate::tools::validate::crawl_rules;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
}

/// `POST /api/crawl`
///
/// Validates the request and builds the crawler up front so unknown,
/// unimplemented or misconfigured crawls fail synchronously; the crawl
/// itself runs on a spawned task tracked in the job store.
pub async fn start_crawl(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiSuccess<CrawlAccepted>>), ApiError> {
    let body = json_body(body)?;
    crawl_rules(CrawlerType::IDS).validate(&body)?;
    let request: CrawlRequest = typed(body)?;

    let crawler = state.crawlers.create(&request.crawler_type)?;
    crawler.check_options(&request.options)?;

    let job = state.jobs.create(JobType::Crawl, &request.crawler_type).await;
    let job_id = job.id;
    info!("Queued crawl job {} ({})", job_id, request.crawler_type);

    let jobs = state.jobs.clone();
    let options = request.options;
    tokio::spawn(async move {
        jobs.mark_running(job_id).await;
        match crawler.run(&options).await {
            Ok(records) => {
                info!("Crawl job {} completed with {} records", job_id, records.len());
                let results = records
                    .iter()
                    .filter_map(|r| serde_json::to_value(r).ok())
                    .collect();
                jobs.complete(job_id, results).await;
            }
            Err(e) => {
                error!("Crawl job {} failed: {}", job_id, e);
                jobs.fail(job_id, e.to_string()).await;
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiSuccess::new(CrawlAccepted {
            job_id,
            status: job.status,
        })),
    ))
}

/// `GET /api/crawl/{job_id}`
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<JobView> {
    let id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::validation("jobId", "jobId must be a UUID"))?;
    let entry = state
        .jobs
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))?;

    let results = (entry.job.status == JobStatus::Completed).then_some(entry.results);
    ok(JobView {
        job: entry.job,
        results,
    })
}

/// `GET /api/crawl/types`
pub async fn crawler_types(State(state): State<Arc<AppState>>) -> ApiResult<Vec<CrawlerTypeInfo>> {
    ok(state.crawlers.available_types())
}
