use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::REQUEST_TIMEOUT_SECS;
use crate::models::job::DEFAULT_MAX_RETRIES;

/// Where jobs, rate-limit windows and cache rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// In-process maps. State is lost on restart; meant for local runs.
    Memory,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub gemini_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub job_batch_size: i64,
    pub job_max_retries: i32,
    pub worker_poll_interval: Duration,
    pub job_stale_after: Duration,
    /// The n-th retry of a job waits `n * job_retry_backoff` after re-queue.
    pub job_retry_backoff: Duration,
    pub cache_ttl: Duration,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    /// Per-endpoint limits as `(endpoint, max_requests, window)`.
    pub rate_limit_overrides: Vec<(String, u32, Duration)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let storage_backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("STORAGE_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        };

        let database_url = match storage_backend {
            StorageBackend::Postgres => Some(require_env("DATABASE_URL")?),
            StorageBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        let job_stale_after = Duration::from_secs(optional_env("JOB_STALE_AFTER_SECS", 300)?);
        check_stale_after(job_stale_after)?;

        Ok(Config {
            storage_backend,
            database_url,
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            job_batch_size: optional_env("JOB_BATCH_SIZE", 10)?,
            job_max_retries: optional_env("JOB_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            worker_poll_interval: Duration::from_millis(optional_env(
                "WORKER_POLL_INTERVAL_MS",
                5_000,
            )?),
            job_stale_after,
            job_retry_backoff: Duration::from_secs(optional_env("JOB_RETRY_BACKOFF_SECS", 5)?),
            cache_ttl: Duration::from_secs(optional_env("CACHE_TTL_SECS", 86_400)?),
            rate_limit_max_requests: optional_env("RATE_LIMIT_MAX_REQUESTS", 10)?,
            rate_limit_window: Duration::from_secs(optional_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_overrides: parse_rate_limit_overrides(
                &std::env::var("RATE_LIMIT_OVERRIDES").unwrap_or_default(),
            )?,
        })
    }
}

/// A claimed job renews its claim right before the provider call, so the
/// stale cutoff must outlast one call or a running job could be recovered
/// and run twice.
fn check_stale_after(stale_after: Duration) -> Result<()> {
    if stale_after <= Duration::from_secs(REQUEST_TIMEOUT_SECS) {
        anyhow::bail!(
            "JOB_STALE_AFTER_SECS must be greater than the {REQUEST_TIMEOUT_SECS}s AI request timeout, got {}",
            stale_after.as_secs()
        );
    }
    Ok(())
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Parses `endpoint=max/window_secs` pairs separated by commas,
/// e.g. `resume_generation=5/60,ats_analysis=20/60`.
fn parse_rate_limit_overrides(raw: &str) -> Result<Vec<(String, u32, Duration)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (endpoint, limit) = entry
                .split_once('=')
                .with_context(|| format!("RATE_LIMIT_OVERRIDES entry '{entry}' is missing '='"))?;
            let (max, secs) = limit
                .split_once('/')
                .with_context(|| format!("RATE_LIMIT_OVERRIDES entry '{entry}' is missing '/'"))?;
            let max = max
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Invalid max_requests in '{entry}'"))?;
            let secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid window seconds in '{entry}'"))?;
            if secs == 0 {
                anyhow::bail!("Window for '{entry}' must be at least one second");
            }
            Ok((endpoint.trim().to_string(), max, Duration::from_secs(secs)))
        })
        .collect()
}
