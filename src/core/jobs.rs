use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use serde_json::Value;
use uuid::Uuid;

use super::types::{Job, JobStatus, JobType};

const JOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A job plus whatever its worker produced.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub job: Job,
    pub results: Vec<Value>,
}

/// In-memory registry of long-running work (crawls).
///
/// Status is set directly by the worker; nothing here enforces transition
/// order. Entries expire a day after their last update.
#[derive(Clone)]
pub struct JobStore {
    jobs: Cache<Uuid, JobEntry>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs", &self.jobs.entry_count())
            .finish()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(JOB_TTL)
                .build(),
        }
    }

    pub async fn create(&self, job_type: JobType, target: &str) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            job_type,
            target: target.to_string(),
            status: JobStatus::Pending,
            result_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.jobs
            .insert(
                job.id,
                JobEntry {
                    job: job.clone(),
                    results: Vec::new(),
                },
            )
            .await;
        job
    }

    pub async fn get(&self, id: &Uuid) -> Option<JobEntry> {
        self.jobs.get(id).await
    }

    async fn update(&self, id: Uuid, f: impl FnOnce(&mut JobEntry)) {
        if let Some(mut entry) = self.jobs.get(&id).await {
            f(&mut entry);
            self.jobs.insert(id, entry).await;
        }
    }

    pub async fn mark_running(&self, id: Uuid) {
        self.update(id, |e| {
            e.job.status = JobStatus::Running;
            e.job.started_at = Some(Utc::now());
        })
        .await;
    }

    pub async fn complete(&self, id: Uuid, results: Vec<Value>) {
        self.update(id, |e| {
            e.job.status = JobStatus::Completed;
            e.job.result_count = results.len();
            e.job.completed_at = Some(Utc::now());
            e.results = results;
        })
        .await;
    }

    pub async fn fail(&self, id: Uuid, message: String) {
        self.update(id, |e| {
            e.job.status = JobStatus::Failed;
            e.job.error_message = Some(message);
            e.job.completed_at = Some(Utc::now());
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lifecycle_updates_status_and_counts() {
        let store = JobStore::new();
        let job = store.create(JobType::Crawl, "nec_library").await;
        assert_eq!(job.status, JobStatus::Pending);

        store.mark_running(job.id).await;
        assert_eq!(store.get(&job.id).await.unwrap().job.status, JobStatus::Running);

        store
            .complete(job.id, vec![json!({ "title": "a" }), json!({ "title": "b" })])
            .await;
        let entry = store.get(&job.id).await.unwrap();
        assert_eq!(entry.job.status, JobStatus::Completed);
        assert_eq!(entry.job.result_count, 2);
        assert!(entry.job.completed_at.is_some());
    }

    #[tokio::test]
    async fn failure_keeps_message() {
        let store = JobStore::new();
        let job = store.create(JobType::Crawl, "custom").await;
        store.fail(job.id, "blocked: http_429".into()).await;
        let entry = store.get(&job.id).await.unwrap();
        assert_eq!(entry.job.status, JobStatus::Failed);
        assert_eq!(entry.job.error_message.as_deref(), Some("blocked: http_429"));
    }

    #[tokio::test]
    async fn unknown_ids_are_none() {
        assert!(JobStore::new().get(&Uuid::new_v4()).await.is_none());
    }
}
