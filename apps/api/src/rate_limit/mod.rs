//! Fixed-window rate limiter keyed by (user, endpoint).
//!
//! Windows are aligned to multiples of the window length since the Unix epoch,
//! so every request in the same window hits the same counter row.
//! `check_and_record` is the gate used on the job-creation path: the compare
//! and the increment are a single store operation.

pub mod handlers;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::rate_limit::store::RateLimitStore;

/// Request budget for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    /// 10 requests per minute.
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    default_policy: RateLimitPolicy,
    policies: HashMap<String, RateLimitPolicy>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, default_policy: RateLimitPolicy) -> Self {
        Self {
            store,
            default_policy,
            policies: HashMap::new(),
        }
    }

    /// Overrides the policy for a single endpoint.
    pub fn with_policy(mut self, endpoint: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.insert(endpoint.into(), policy);
        self
    }

    pub fn policy_for(&self, endpoint: &str) -> RateLimitPolicy {
        self.policies
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Read-only check of the current window.
    pub async fn check_rate_limit(
        &self,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<RateLimitStatus, AppError> {
        self.check_rate_limit_at(user_id, endpoint, Utc::now()).await
    }

    pub async fn check_rate_limit_at(
        &self,
        user_id: Uuid,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, AppError> {
        let policy = self.policy_for(endpoint);
        let window_start = window_start_for(now, policy.window)?;
        let count = self
            .store
            .current_count(user_id, endpoint, window_start)
            .await?;
        Ok(status(policy, window_start, count, count < policy.max_requests))
    }

    /// Counts one request against the current window without gating it.
    /// The job-creation path uses `check_and_record` instead; this is for
    /// callers that admit a request on their own terms and only need it counted.
    pub async fn record_request(
        &self,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<RateLimitStatus, AppError> {
        self.record_request_at(user_id, endpoint, Utc::now()).await
    }

    pub async fn record_request_at(
        &self,
        user_id: Uuid,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, AppError> {
        let policy = self.policy_for(endpoint);
        let window_start = window_start_for(now, policy.window)?;
        let count = self.store.increment(user_id, endpoint, window_start).await?;
        Ok(status(policy, window_start, count, count <= policy.max_requests))
    }

    /// Admits and counts the request if the window still has budget.
    /// A denied request is not counted.
    pub async fn check_and_record(
        &self,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<RateLimitStatus, AppError> {
        self.check_and_record_at(user_id, endpoint, Utc::now()).await
    }

    pub async fn check_and_record_at(
        &self,
        user_id: Uuid,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, AppError> {
        let policy = self.policy_for(endpoint);
        let window_start = window_start_for(now, policy.window)?;

        if policy.max_requests == 0 {
            return Ok(status(policy, window_start, 0, false));
        }

        match self
            .store
            .increment_below(user_id, endpoint, window_start, policy.max_requests)
            .await?
        {
            Some(count) => {
                debug!(%user_id, endpoint, count, "request admitted");
                Ok(status(policy, window_start, count, true))
            }
            None => {
                warn!(%user_id, endpoint, "rate limit reached");
                Ok(status(policy, window_start, policy.max_requests, false))
            }
        }
    }

    /// Drops counter rows for windows that can no longer be active.
    pub async fn purge_expired_windows(&self) -> Result<u64, AppError> {
        let longest = self
            .policies
            .values()
            .map(|p| p.window)
            .chain(std::iter::once(self.default_policy.window))
            .max()
            .unwrap_or(self.default_policy.window);
        let longest = chrono::Duration::from_std(longest)
            .map_err(|_| AppError::Validation("Rate limit window is out of range".to_string()))?;
        self.store.delete_windows_before(Utc::now() - longest).await
    }
}

fn status(
    policy: RateLimitPolicy,
    window_start: DateTime<Utc>,
    count: u32,
    allowed: bool,
) -> RateLimitStatus {
    let window = chrono::Duration::seconds(window_secs(policy.window));
    RateLimitStatus {
        allowed,
        limit: policy.max_requests,
        remaining: policy.max_requests.saturating_sub(count),
        reset_time: window_start + window,
    }
}

fn window_secs(window: Duration) -> i64 {
    i64::try_from(window.as_secs()).unwrap_or(i64::MAX).max(1)
}

/// Start of the fixed window containing `now`.
pub fn window_start_for(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>, AppError> {
    let secs = window_secs(window);
    let ts = now.timestamp();
    let start = ts - ts.rem_euclid(secs);
    Utc.timestamp_opt(start, 0)
        .single()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Invalid window start {start}")))
}
