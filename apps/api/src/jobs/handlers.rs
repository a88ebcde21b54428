//! Axum route handlers for the Jobs API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::cache::cache_key;
use crate::errors::AppError;
use crate::jobs::input::JobInput;
use crate::jobs::processor::ProcessSummary;
use crate::models::job::{Job, JobType};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 20;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub user_id: Uuid,
    pub job_type: JobType,
    pub input: Value,
    #[serde(default)]
    pub priority: i32,
}

/// Either a freshly queued job or a cached result for identical input.
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub user_id: Uuid,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    pub limit: Option<i64>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/jobs
///
/// validate input → rate limit → cache lookup → enqueue + wake the worker.
/// Returns 200 with the cached result on a hit, 202 with the job otherwise.
pub async fn handle_create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    JobInput::parse(request.job_type, &request.input)?;

    let limit = state
        .rate_limiter
        .check_and_record(request.user_id, request.job_type.as_str())
        .await?;
    if !limit.allowed {
        return Err(AppError::RateLimited {
            reset_time: limit.reset_time,
        });
    }

    let key = cache_key(request.job_type.as_str(), &request.input);
    if let Some(result) = state.cache.get(&key).await? {
        info!(user_id = %request.user_id, job_type = %request.job_type, "Served from cache");
        return Ok((
            StatusCode::OK,
            Json(CreateJobResponse {
                cached: true,
                job: None,
                result: Some(result),
            }),
        ));
    }

    let job = state
        .queue
        .create_job(
            request.user_id,
            request.job_type,
            request.input,
            request.priority,
        )
        .await?;
    state.trigger.nudge();

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            cached: false,
            job: Some(job),
            result: None,
        }),
    ))
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    let job = state
        .queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;
    Ok(Json(job))
}

/// GET /api/v1/jobs?user_id=&limit=
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, AppError> {
    let jobs = state
        .queue
        .list_jobs(params.user_id, params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(ListJobsResponse { jobs }))
}

/// POST /api/v1/jobs/:id/retry
pub async fn handle_retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    let job = state.queue.retry_job(job_id).await?;
    state.trigger.nudge();
    Ok(Json(job))
}

/// POST /api/v1/jobs/process?limit=
///
/// Runs one batch synchronously, for external schedulers.
pub async fn handle_process_jobs(
    State(state): State<AppState>,
    Query(params): Query<ProcessQuery>,
) -> Result<Json<ProcessSummary>, AppError> {
    let limit = params
        .limit
        .unwrap_or(state.config.job_batch_size)
        .clamp(1, state.config.job_batch_size.max(1));
    let summary = state.processor.process_batch(limit).await?;
    Ok(Json(summary))
}
