use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Config;
use crate::jobs::processor::JobProcessor;
use crate::jobs::queue::JobQueue;
use crate::jobs::worker::JobTrigger;
use crate::rate_limit::RateLimiter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    pub processor: Arc<JobProcessor>,
    pub rate_limiter: RateLimiter,
    pub cache: Cache,
    /// Wakes the background worker when new work is queued.
    pub trigger: JobTrigger,
    pub config: Config,
}
