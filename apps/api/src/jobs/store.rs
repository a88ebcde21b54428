//! Storage backends for `ai_jobs` rows.
//!
//! Every status write is conditional on the status the caller last saw, so a
//! row that moved underneath a writer is never clobbered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{Job, JobRow, JobStatus, NewJob};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, new_job: NewJob) -> Result<Job, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, AppError>;

    /// Moves a job from `from` to `to` if it is still in `from`.
    ///
    /// - `completed` stores `result`, clears the error and stamps `processed_at`
    /// - `failed` stores `error` and stamps `processed_at`
    /// - `failed → pending` increments `retry_count`, only while budget remains
    ///
    /// Returns `None` when the row is missing or no longer in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<Job>, AppError>;

    /// Claims up to `limit` pending jobs (priority desc, oldest first) and marks
    /// them `processing`. Concurrent callers never receive the same job.
    ///
    /// A job on its n-th retry is only eligible once `n * retry_backoff` has
    /// passed since it was re-queued.
    async fn claim_pending(
        &self,
        limit: i64,
        retry_backoff: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, AppError>;

    /// Refreshes the claim on a `processing` job right before it runs.
    ///
    /// Returns `None` when the claim taken at `claimed_at` is no longer held,
    /// i.e. the job was recovered as stale and possibly claimed by someone else.
    async fn renew_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<Job>, AppError>;

    /// Returns `processing` jobs last touched before `cutoff` to `pending`.
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

fn sort_claimed(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, new_job: NewJob) -> Result<Job, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO ai_jobs (id, user_id, job_type, input, status, retry_count, max_retries, priority)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_job.user_id)
        .bind(new_job.job_type.as_str())
        .bind(&new_job.input)
        .bind(new_job.max_retries)
        .bind(new_job.priority)
        .fetch_one(&self.pool)
        .await?;
        Job::try_from(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM ai_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, AppError> {
        sqlx::query_as::<_, JobRow>(
            "SELECT * FROM ai_jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Job::try_from)
        .collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<Job>, AppError> {
        sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE ai_jobs SET
                status = $3,
                result = CASE WHEN $3 = 'completed' THEN $4 ELSE result END,
                error_message = CASE
                    WHEN $3 = 'completed' THEN NULL
                    WHEN $3 = 'failed' THEN $5
                    ELSE error_message
                END,
                retry_count = CASE
                    WHEN $2 = 'failed' AND $3 = 'pending' THEN retry_count + 1
                    ELSE retry_count
                END,
                processed_at = CASE
                    WHEN $3 IN ('completed', 'failed') THEN NOW()
                    ELSE processed_at
                END,
                updated_at = NOW()
            WHERE id = $1
              AND status = $2
              AND NOT ($2 = 'failed' AND $3 = 'pending' AND retry_count >= max_retries)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(result)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .map(Job::try_from)
        .transpose()
    }

    async fn claim_pending(
        &self,
        limit: i64,
        retry_backoff: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, AppError> {
        let backoff_secs = retry_backoff.num_milliseconds() as f64 / 1000.0;
        let mut jobs = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE ai_jobs SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM ai_jobs
                WHERE status = 'pending'
                  AND (
                      retry_count = 0
                      OR updated_at <= $2 - make_interval(secs => $3::float8 * retry_count)
                  )
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(now)
        .bind(backoff_secs)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Job::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        // RETURNING does not preserve the subquery order.
        sort_claimed(&mut jobs);
        Ok(jobs)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<Job>, AppError> {
        sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE ai_jobs SET updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND updated_at = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .fetch_optional(&self.pool)
        .await?
        .map(Job::try_from)
        .transpose()
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE ai_jobs SET status = 'pending', updated_at = NOW()
            WHERE status = 'processing' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

/// Jobs kept in insertion order so FIFO ties resolve deterministically.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new_job: NewJob) -> Result<Job, AppError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: new_job.user_id,
            job_type: new_job.job_type,
            input: new_job.input,
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: new_job.max_retries,
            priority: new_job.priority,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self.jobs.lock().await.iter().find(|j| j.id == id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, AppError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| j.user_id == user_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<Job>, AppError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id && j.status == from) else {
            return Ok(None);
        };

        let now = Utc::now();
        match to {
            JobStatus::Completed => {
                job.result = result;
                job.error_message = None;
                job.processed_at = Some(now);
            }
            JobStatus::Failed => {
                job.error_message = error;
                job.processed_at = Some(now);
            }
            JobStatus::Pending if from == JobStatus::Failed => {
                if !job.has_retry_budget() {
                    return Ok(None);
                }
                job.retry_count += 1;
            }
            _ => {}
        }
        job.status = to;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn claim_pending(
        &self,
        limit: i64,
        retry_backoff: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, AppError> {
        let mut jobs = self.jobs.lock().await;
        let mut candidates: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.status == JobStatus::Pending
                    && (j.retry_count == 0 || j.updated_at <= now - retry_backoff * j.retry_count)
            })
            .map(|(i, _)| i)
            .collect();
        // Stable sort keeps insertion order among equal timestamps.
        candidates.sort_by(|&a, &b| {
            jobs[b]
                .priority
                .cmp(&jobs[a].priority)
                .then_with(|| jobs[a].created_at.cmp(&jobs[b].created_at))
        });

        let claimed_at = Utc::now();
        let mut claimed = Vec::new();
        for idx in candidates
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
        {
            let job = &mut jobs[idx];
            job.status = JobStatus::Processing;
            job.updated_at = claimed_at;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<Job>, AppError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.iter_mut().find(|j| {
            j.id == id && j.status == JobStatus::Processing && j.updated_at == claimed_at
        }) else {
            return Ok(None);
        };
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut jobs = self.jobs.lock().await;
        let mut requeued = 0;
        for job in jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < cutoff)
        {
            job.status = JobStatus::Pending;
            job.updated_at = Utc::now();
            requeued += 1;
        }
        Ok(requeued)
    }
}
