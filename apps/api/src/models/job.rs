use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// Default retry budget for a job.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// The kind of AI work a job performs. Stored as snake_case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CoverLetter,
    ContentOptimization,
    ResumeGeneration,
    AtsAnalysis,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::CoverLetter,
        JobType::ContentOptimization,
        JobType::ResumeGeneration,
        JobType::AtsAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CoverLetter => "cover_letter",
            JobType::ContentOptimization => "content_optimization",
            JobType::ResumeGeneration => "resume_generation",
            JobType::AtsAnalysis => "ats_analysis",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown job type '{s}'")))
    }
}

/// Lifecycle state of a job.
///
/// `pending → processing → {completed | failed}`, with `failed → pending`
/// while retry budget remains and `processing → pending` when a stale claim
/// is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(AppError::Validation(format!("Unknown job status '{other}'"))),
        }
    }
}

/// Raw `ai_jobs` row as stored in Postgres.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_type: String,
    pub input: Value,
    pub status: String,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A queued unit of AI work with status and retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_type: JobType,
    pub input: Value,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            user_id: row.user_id,
            job_type: row.job_type.parse()?,
            input: row.input,
            status: row.status.parse()?,
            result: row.result,
            error_message: row.error_message,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

/// Parameters for enqueueing a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Uuid,
    pub job_type: JobType,
    pub input: Value,
    pub priority: i32,
    pub max_retries: i32,
}
