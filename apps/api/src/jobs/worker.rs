//! Background worker: drives the processor from inside the service.
//!
//! Wakes on a `JobTrigger` nudge (a job was enqueued or retried) or on the poll
//! interval, whichever comes first. Each tick recovers stale claims, drains the
//! queue in batches and then runs housekeeping on the cache and rate-limit
//! tables.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

use crate::cache::Cache;
use crate::errors::AppError;
use crate::jobs::processor::{JobProcessor, ProcessSummary};
use crate::rate_limit::RateLimiter;

/// Batches drained per tick before yielding back to the poll loop.
const MAX_BATCHES_PER_TICK: usize = 10;

/// Wakes the worker without waiting for the next poll.
#[derive(Clone, Default)]
pub struct JobTrigger {
    notify: Arc<Notify>,
}

impl JobTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nudge(&self) {
        self.notify.notify_one();
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

pub struct JobWorker {
    pub processor: Arc<JobProcessor>,
    pub cache: Cache,
    pub rate_limiter: RateLimiter,
    pub trigger: JobTrigger,
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl JobWorker {
    pub fn spawn(self) -> JoinHandle<()> {
        let span = tracing::info_span!("job_worker");
        tokio::spawn(async move { self.run().await }.instrument(span))
    }

    /// Runs forever.
    pub async fn run(self) {
        info!(
            "Job worker started (batch_size={}, poll_interval={:?})",
            self.batch_size, self.poll_interval
        );
        loop {
            tokio::select! {
                _ = self.trigger.notified() => debug!("Woken by trigger"),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if let Err(e) = self.tick().await {
                error!("Job worker tick failed: {e}");
            }
        }
    }

    /// One pass: recover, drain, tidy up. Returns the combined batch summary.
    pub async fn tick(&self) -> Result<ProcessSummary, AppError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|_| AppError::Validation("stale_after is out of range".to_string()))?;
        self.processor
            .queue()
            .requeue_stale(Utc::now() - stale_after)
            .await?;

        let mut total = ProcessSummary::default();
        for _ in 0..MAX_BATCHES_PER_TICK {
            let summary = self.processor.process_batch(self.batch_size).await?;
            total.claimed += summary.claimed;
            total.completed += summary.completed;
            total.retried += summary.retried;
            total.failed += summary.failed;
            total.errors += summary.errors;
            total.reclaimed += summary.reclaimed;
            // A short batch means the queue is drained. After a retry, stop so
            // the re-queued job waits for a later tick instead of running again.
            let full = i64::try_from(summary.claimed).map_or(false, |n| n >= self.batch_size);
            if summary.claimed == 0 || !full || summary.retried > 0 {
                break;
            }
        }

        let purged = self.cache.purge_expired().await?;
        let windows = self.rate_limiter.purge_expired_windows().await?;
        if purged > 0 || windows > 0 {
            debug!(purged, windows, "Housekeeping removed expired rows");
        }

        Ok(total)
    }
}
