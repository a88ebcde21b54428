mod cache;
mod config;
mod db;
mod errors;
mod jobs;
mod llm_client;
mod models;
mod rate_limit;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::store::{CacheStore, MemoryCacheStore, PgCacheStore};
use crate::cache::Cache;
use crate::config::{Config, StorageBackend};
use crate::db::create_pool;
use crate::jobs::processor::JobProcessor;
use crate::jobs::queue::JobQueue;
use crate::jobs::store::{JobStore, MemoryJobStore, PgJobStore};
use crate::jobs::worker::{JobTrigger, JobWorker};
use crate::llm_client::GeminiClient;
use crate::rate_limit::store::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore};
use crate::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume jobs API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage
    let (job_store, rate_limit_store, cache_store) = build_stores(&config).await?;

    // Initialize LLM client
    let gemini = GeminiClient::new(config.gemini_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let cache = Cache::new(cache_store);
    let queue = JobQueue::new(job_store, config.job_max_retries)
        .with_retry_backoff(config.job_retry_backoff);
    let rate_limiter = config.rate_limit_overrides.iter().fold(
        RateLimiter::new(
            rate_limit_store,
            RateLimitPolicy {
                max_requests: config.rate_limit_max_requests,
                window: config.rate_limit_window,
            },
        ),
        |limiter, (endpoint, max_requests, window)| {
            info!("Rate limit override: {endpoint} = {max_requests} per {window:?}");
            limiter.with_policy(
                endpoint.clone(),
                RateLimitPolicy {
                    max_requests: *max_requests,
                    window: *window,
                },
            )
        },
    );
    let processor = Arc::new(JobProcessor::new(
        queue.clone(),
        Arc::new(gemini),
        cache.clone(),
        config.cache_ttl,
    ));
    let trigger = JobTrigger::new();

    // Start the background worker
    JobWorker {
        processor: processor.clone(),
        cache: cache.clone(),
        rate_limiter: rate_limiter.clone(),
        trigger: trigger.clone(),
        batch_size: config.job_batch_size,
        poll_interval: config.worker_poll_interval,
        stale_after: config.job_stale_after,
    }
    .spawn();

    // Build app state
    let state = AppState {
        queue,
        processor,
        rate_limiter,
        cache,
        trigger,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the web app's domain

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

type Stores = (
    Arc<dyn JobStore>,
    Arc<dyn RateLimitStore>,
    Arc<dyn CacheStore>,
);

/// Builds the job, rate-limit and cache stores for the configured backend.
async fn build_stores(config: &Config) -> Result<Stores> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres storage"))?;
            let db = create_pool(database_url).await?;
            let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db.clone()));
            let limits: Arc<dyn RateLimitStore> = Arc::new(PgRateLimitStore::new(db.clone()));
            let cache: Arc<dyn CacheStore> = Arc::new(PgCacheStore::new(db));
            Ok((jobs, limits, cache))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; jobs, limits and cache are lost on restart");
            let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            let limits: Arc<dyn RateLimitStore> = Arc::new(MemoryRateLimitStore::new());
            let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
            Ok((jobs, limits, cache))
        }
    }
}
