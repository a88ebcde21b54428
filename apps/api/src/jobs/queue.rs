//! Job Queue: creates, reads and moves AI jobs through their lifecycle.
//!
//! All status changes go through `update_status` / `retry_job`, which enforce
//! the transition table in `JobStatus::can_transition_to` and the payload
//! rules: `completed` needs a result, `failed` needs an error message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::store::JobStore;
use crate::models::job::{Job, JobStatus, JobType, NewJob};

/// Upper bound on `list_jobs`.
pub const MAX_LIST_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    max_retries: i32,
    retry_backoff: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, max_retries: i32) -> Self {
        Self {
            store,
            max_retries: max_retries.max(0),
            retry_backoff: Duration::ZERO,
        }
    }

    /// Delays the n-th retry of a job by `n * backoff` after it was re-queued.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Enqueues a `pending` job. No deduplication: identical requests create
    /// separate rows.
    pub async fn create_job(
        &self,
        user_id: Uuid,
        job_type: JobType,
        input: Value,
        priority: i32,
    ) -> Result<Job, AppError> {
        let job = self
            .store
            .insert(NewJob {
                user_id,
                job_type,
                input,
                priority,
                max_retries: self.max_retries,
            })
            .await?;
        info!(job_id = %job.id, %user_id, %job_type, priority, "Job enqueued");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        self.store.get(id).await
    }

    pub async fn list_jobs(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, AppError> {
        self.store
            .list_for_user(user_id, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// Moves a job to `status`, validating the transition and its payload.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Job, AppError> {
        let current = self.require_job(id).await?;

        if !current.status.can_transition_to(status) {
            return Err(AppError::Validation(format!(
                "Job {id} cannot move from {} to {status}",
                current.status
            )));
        }

        match status {
            JobStatus::Completed if result.as_ref().map_or(true, Value::is_null) => {
                return Err(AppError::Validation(
                    "A completed job must carry a result".to_string(),
                ));
            }
            JobStatus::Failed if error.as_deref().map_or(true, |e| e.trim().is_empty()) => {
                return Err(AppError::Validation(
                    "A failed job must carry an error message".to_string(),
                ));
            }
            JobStatus::Pending if current.status == JobStatus::Failed => {
                return self.retry_job(id).await;
            }
            _ => {}
        }

        self.store
            .transition(id, current.status, status, result, error)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "Job {id} changed state while moving from {} to {status}",
                    current.status
                ))
            })
    }

    /// Re-queues a failed job, spending one retry.
    pub async fn retry_job(&self, id: Uuid) -> Result<Job, AppError> {
        let current = self.require_job(id).await?;

        if current.status != JobStatus::Failed {
            return Err(AppError::Validation(format!(
                "Only failed jobs can be retried; job {id} is {}",
                current.status
            )));
        }
        if !current.has_retry_budget() {
            return Err(AppError::Validation(format!(
                "Job {id} has used all {} retries",
                current.max_retries
            )));
        }

        let job = self
            .store
            .transition(id, JobStatus::Failed, JobStatus::Pending, None, None)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Job {id} changed state during retry")))?;

        info!(
            job_id = %id,
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            "Job re-queued"
        );
        Ok(job)
    }

    pub async fn claim_pending(&self, limit: i64) -> Result<Vec<Job>, AppError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let backoff = chrono::Duration::from_std(self.retry_backoff)
            .map_err(|_| AppError::Validation("retry backoff is out of range".to_string()))?;
        self.store.claim_pending(limit, backoff, Utc::now()).await
    }

    /// Re-stamps a claimed job just before it runs. `None` means the claim was
    /// lost to stale recovery and the job must not run here.
    pub async fn renew_claim(&self, job: &Job) -> Result<Option<Job>, AppError> {
        let renewed = self.store.renew_claim(job.id, job.updated_at).await?;
        if renewed.is_none() {
            warn!(job_id = %job.id, "Claim lost before the job started; skipping");
        }
        Ok(renewed)
    }

    /// Recovers jobs whose processor went away mid-flight.
    pub async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let requeued = self.store.requeue_stale(cutoff).await?;
        if requeued > 0 {
            warn!(requeued, "Recovered stale processing jobs");
        }
        Ok(requeued)
    }

    async fn require_job(&self, id: Uuid) -> Result<Job, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
    }
}
