//! Job Processor: claims pending jobs and runs each one against the AI provider.
//!
//! Flow per job: claim (pending → processing) → renew the claim → build
//! prompt from input → one provider call → completed + cache write, or
//! failed → re-queue while the error is retryable and
//! `retry_count < max_retries`.
//!
//! Jobs in a batch run one after another. A failure is scoped to its job;
//! the rest of the batch still runs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::{cache_key, Cache};
use crate::errors::AppError;
use crate::jobs::input::JobInput;
use crate::jobs::queue::JobQueue;
use crate::llm_client::{parse_json_or_text, AiProvider, LlmError};
use crate::models::job::{Job, JobStatus};

/// Why a single job run failed. Stored on the job as its error message.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("AI provider error: {0}")]
    Provider(#[from] LlmError),
}

/// Counts for one `process_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Jobs whose outcome could not be written back.
    pub errors: usize,
    /// Jobs skipped because stale recovery took their claim before they ran.
    pub reclaimed: usize,
}

impl JobError {
    /// Invalid input fails the same way every time, so it is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::InvalidInput(_) => false,
            JobError::Provider(e) => e.is_retryable(),
        }
    }
}

enum Outcome {
    Completed,
    Retried,
    Failed,
}

pub struct JobProcessor {
    queue: JobQueue,
    provider: Arc<dyn AiProvider>,
    cache: Cache,
    cache_ttl: Duration,
}

impl JobProcessor {
    pub fn new(
        queue: JobQueue,
        provider: Arc<dyn AiProvider>,
        cache: Cache,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            queue,
            provider,
            cache,
            cache_ttl,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claims up to `limit` pending jobs and runs them in claim order.
    pub async fn process_batch(&self, limit: i64) -> Result<ProcessSummary, AppError> {
        let jobs = self.queue.claim_pending(limit).await?;
        let mut summary = ProcessSummary {
            claimed: jobs.len(),
            ..ProcessSummary::default()
        };

        if jobs.is_empty() {
            return Ok(summary);
        }
        info!("Claimed {} job(s) for processing", jobs.len());

        for claimed in &jobs {
            let job = match self.queue.renew_claim(claimed).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    summary.reclaimed += 1;
                    continue;
                }
                Err(e) => {
                    error!(job_id = %claimed.id, "Could not renew job claim: {e}");
                    summary.errors += 1;
                    continue;
                }
            };
            match self.process_job(&job).await {
                Ok(Outcome::Completed) => summary.completed += 1,
                Ok(Outcome::Retried) => summary.retried += 1,
                Ok(Outcome::Failed) => summary.failed += 1,
                Err(e) => {
                    error!(job_id = %job.id, "Could not record job outcome: {e}");
                    summary.errors += 1;
                }
            }
        }

        info!(
            completed = summary.completed,
            retried = summary.retried,
            failed = summary.failed,
            errors = summary.errors,
            reclaimed = summary.reclaimed,
            "Batch finished"
        );
        Ok(summary)
    }

    async fn process_job(&self, job: &Job) -> Result<Outcome, AppError> {
        match self.execute(job).await {
            Ok(result) => {
                self.queue
                    .update_status(job.id, JobStatus::Completed, Some(result.clone()), None)
                    .await?;
                info!(job_id = %job.id, job_type = %job.job_type, "Job completed");

                let key = cache_key(job.job_type.as_str(), &job.input);
                if let Err(e) = self.cache.set(&key, &result, self.cache_ttl).await {
                    warn!(job_id = %job.id, "Failed to cache job result: {e}");
                }
                Ok(Outcome::Completed)
            }
            Err(job_error) => {
                let retryable = job_error.is_retryable();
                let message = job_error.to_string();
                let failed = self
                    .queue
                    .update_status(job.id, JobStatus::Failed, None, Some(message.clone()))
                    .await?;

                if retryable && failed.has_retry_budget() {
                    let retried = self.queue.retry_job(job.id).await?;
                    warn!(
                        job_id = %job.id,
                        retry_count = retried.retry_count,
                        max_retries = retried.max_retries,
                        "Job failed, re-queued: {message}"
                    );
                    Ok(Outcome::Retried)
                } else {
                    error!(
                        job_id = %job.id,
                        retry_count = failed.retry_count,
                        retryable,
                        "Job failed permanently: {message}"
                    );
                    Ok(Outcome::Failed)
                }
            }
        }
    }

    /// Exactly one provider call per run.
    async fn execute(&self, job: &Job) -> Result<Value, JobError> {
        let input = JobInput::parse(job.job_type, &job.input)
            .map_err(|e| JobError::InvalidInput(e.to_string()))?;
        let prepared = input.prepare_prompt();

        let text = self
            .provider
            .generate(&prepared.prompt, prepared.system)
            .await?;

        if text.trim().is_empty() {
            return Err(JobError::Provider(LlmError::EmptyContent));
        }

        Ok(if prepared.expects_json {
            parse_json_or_text(&text)
        } else {
            Value::String(text.trim().to_string())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use crate::cache::store::MemoryCacheStore;
    use crate::jobs::store::MemoryJobStore;
    use crate::models::job::JobType;

    /// Replays scripted responses in order; every call is recorded.
    pub(crate) struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn always_ok(text: &str, times: usize) -> Self {
            Self::new((0..times).map(|_| Ok(text.to_string())).collect())
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        async fn generate(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
            self.calls.lock().await.push(prompt.to_string());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyContent))
        }
    }

    fn quota_error() -> LlmError {
        LlmError::Api {
            status: 429,
            message: "Resource has been exhausted (e.g. check quota).".to_string(),
        }
    }

    fn setup(provider: ScriptedProvider) -> (JobProcessor, Cache, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let cache = Cache::new(Arc::new(MemoryCacheStore::new()));
        let queue = JobQueue::new(Arc::new(MemoryJobStore::new()), 3);
        let processor = JobProcessor::new(
            queue,
            provider.clone(),
            cache.clone(),
            Duration::from_secs(3600),
        );
        (processor, cache, provider)
    }

    fn cover_letter_input() -> Value {
        json!({
            "job_description": "x".repeat(500),
            "tone": "formal",
            "company_name": "Acme",
        })
    }

    #[tokio::test]
    async fn test_cover_letter_job_completes_with_string_result() {
        let (processor, cache, provider) =
            setup(ScriptedProvider::always_ok("Dear Hiring Manager,\n\nI wish to apply.", 1));
        let input = cover_letter_input();
        let job = processor
            .queue()
            .create_job(Uuid::new_v4(), JobType::CoverLetter, input.clone(), 0)
            .await
            .unwrap();

        let summary = processor.process_batch(10).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);

        let job = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let text = job.result.as_ref().and_then(Value::as_str).unwrap();
        assert!(!text.is_empty());
        assert!(job.retry_count <= job.max_retries);
        assert_eq!(provider.calls.lock().await.len(), 1);

        let cached = cache
            .get(&cache_key("cover_letter", &input))
            .await
            .unwrap();
        assert_eq!(cached, job.result);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_then_completes() {
        let (processor, _, _) = setup(ScriptedProvider::new(vec![
            Err(quota_error()),
            Ok("{\"score\": 81}".to_string()),
        ]));
        let job = processor
            .queue()
            .create_job(
                Uuid::new_v4(),
                JobType::AtsAnalysis,
                json!({"resume_text": "Rust, SQL", "job_description": "Rust"}),
                0,
            )
            .await
            .unwrap();

        let first = processor.process_batch(10).await.unwrap();
        assert_eq!(first.retried, 1);
        let mid = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert_eq!(mid.status, JobStatus::Pending);
        assert_eq!(mid.retry_count, 1);

        let second = processor.process_batch(10).await.unwrap();
        assert_eq!(second.completed, 1);
        let done = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.result, Some(json!({"score": 81})));
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_in_terminal_failure() {
        let (processor, _, provider) = setup(ScriptedProvider::new(
            (0..4).map(|_| Err(quota_error())).collect(),
        ));
        let job = processor
            .queue()
            .create_job(
                Uuid::new_v4(),
                JobType::ContentOptimization,
                json!({"content": "Did stuff"}),
                0,
            )
            .await
            .unwrap();

        for _ in 0..3 {
            let summary = processor.process_batch(10).await.unwrap();
            assert_eq!(summary.retried, 1);
            let j = processor.queue().get_job(job.id).await.unwrap().unwrap();
            assert!(j.retry_count <= j.max_retries);
        }
        let last = processor.process_batch(10).await.unwrap();
        assert_eq!(last.failed, 1);

        let job = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert!(job.error_message.as_deref().unwrap().contains("429"));
        assert_eq!(provider.calls.lock().await.len(), 4);

        assert_eq!(processor.process_batch(10).await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn test_non_json_output_falls_back_to_text() {
        let (processor, _, _) =
            setup(ScriptedProvider::always_ok("Led a team of four engineers.", 1));
        let job = processor
            .queue()
            .create_job(
                Uuid::new_v4(),
                JobType::ContentOptimization,
                json!({"content": "was in charge of 4 engineers"}),
                0,
            )
            .await
            .unwrap();

        processor.process_batch(1).await.unwrap();
        let job = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.result, Some(json!("Led a team of four engineers.")));
    }

    #[tokio::test]
    async fn test_blank_output_counts_as_failure() {
        let (processor, _, _) = setup(ScriptedProvider::always_ok("   ", 1));
        let job = processor
            .queue()
            .create_job(Uuid::new_v4(), JobType::CoverLetter, cover_letter_input(), 0)
            .await
            .unwrap();

        let summary = processor.process_batch(1).await.unwrap();
        assert_eq!(summary.retried, 1);
        let job = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn test_batch_runs_highest_priority_first() {
        let (processor, _, provider) = setup(ScriptedProvider::always_ok("ok", 2));
        let user = Uuid::new_v4();
        processor
            .queue()
            .create_job(user, JobType::ContentOptimization, json!({"content": "low"}), 0)
            .await
            .unwrap();
        processor
            .queue()
            .create_job(user, JobType::ContentOptimization, json!({"content": "high"}), 5)
            .await
            .unwrap();

        let summary = processor.process_batch(1).await.unwrap();
        assert_eq!(summary.claimed, 1);
        let calls = provider.calls.lock().await;
        assert!(calls[0].contains("high"));
    }

    #[tokio::test]
    async fn test_one_bad_job_does_not_stop_the_batch() {
        let (processor, _, _) = setup(ScriptedProvider::always_ok("fine", 1));
        let user = Uuid::new_v4();
        // Bypasses handler validation, so the processor sees a malformed payload.
        let bad = processor
            .queue()
            .create_job(user, JobType::AtsAnalysis, json!({"resume_text": "only"}), 10)
            .await
            .unwrap();
        let good = processor
            .queue()
            .create_job(user, JobType::ContentOptimization, json!({"content": "ok"}), 0)
            .await
            .unwrap();

        let summary = processor.process_batch(10).await.unwrap();
        assert_eq!(summary.claimed, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);

        let bad = processor.queue().get_job(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.retry_count, 0);
        assert!(bad
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("invalid job input"));
        let good = processor.queue().get_job(good.id).await.unwrap().unwrap();
        assert_eq!(good.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_rejected_request_fails_without_spending_retries() {
        let (processor, _, provider) = setup(ScriptedProvider::new(vec![Err(LlmError::Api {
            status: 400,
            message: "Invalid argument".to_string(),
        })]));
        let job = processor
            .queue()
            .create_job(
                Uuid::new_v4(),
                JobType::ContentOptimization,
                json!({"content": "Shipped v2"}),
                0,
            )
            .await
            .unwrap();

        let summary = processor.process_batch(10).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retried, 0);

        let job = processor.queue().get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert_eq!(provider.calls.lock().await.len(), 1);
    }

    /// Simulates another worker recovering and re-claiming every in-flight
    /// job while the first job of the batch is still running.
    struct StealingProvider {
        queue: JobQueue,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AiProvider for StealingProvider {
        async fn generate(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
            let mut calls = self.calls.lock().await;
            if calls.is_empty() {
                self.queue
                    .requeue_stale(chrono::Utc::now() + chrono::Duration::seconds(1))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
                self.queue.claim_pending(10).await.unwrap();
            }
            calls.push(prompt.to_string());
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn test_job_whose_claim_was_taken_over_is_not_run_twice() {
        let queue = JobQueue::new(Arc::new(MemoryJobStore::new()), 3);
        let provider = Arc::new(StealingProvider {
            queue: queue.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let processor = JobProcessor::new(
            queue.clone(),
            provider.clone(),
            Cache::new(Arc::new(MemoryCacheStore::new())),
            Duration::from_secs(60),
        );
        let user = Uuid::new_v4();
        queue
            .create_job(user, JobType::ContentOptimization, json!({"content": "first"}), 1)
            .await
            .unwrap();
        let second = queue
            .create_job(user, JobType::ContentOptimization, json!({"content": "second"}), 0)
            .await
            .unwrap();

        let summary = processor.process_batch(10).await.unwrap();
        assert_eq!(summary.claimed, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.reclaimed, 1);
        assert_eq!(provider.calls.lock().await.len(), 1);

        let second = queue.get_job(second.id).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Processing);
    }
}
