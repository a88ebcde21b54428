//! Storage backends for fixed-window request counters.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::rate_limit::RateLimitRow;

/// One counter row per (user, endpoint, window_start).
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count recorded in the given window; 0 when the window has no row yet.
    async fn current_count(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32, AppError>;

    /// Unconditionally increments the window counter, creating the row if needed.
    async fn increment(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32, AppError>;

    /// Atomically increments only while the counter is below `max`.
    /// Returns the new count, or `None` if the limit was already reached.
    async fn increment_below(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
        max: u32,
    ) -> Result<Option<u32>, AppError>;

    /// Drops windows that started before `cutoff`.
    async fn delete_windows_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn current_count(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            SELECT * FROM rate_limits
            WHERE user_id = $1 AND endpoint = $2 AND window_start = $3
            "#,
        )
        .bind(user_id)
        .bind(endpoint)
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map_or(0, |r| r.request_count.max(0) as u32))
    }

    async fn increment(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (user_id, endpoint, window_start, request_count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (user_id, endpoint, window_start)
            DO UPDATE SET request_count = rate_limits.request_count + 1
            RETURNING request_count
            "#,
        )
        .bind(user_id)
        .bind(endpoint)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn increment_below(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
        max: u32,
    ) -> Result<Option<u32>, AppError> {
        // The conflict branch only fires while the counter is under the limit,
        // so the compare and the increment happen in one statement.
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (user_id, endpoint, window_start, request_count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (user_id, endpoint, window_start)
            DO UPDATE SET request_count = rate_limits.request_count + 1
            WHERE rate_limits.request_count < $4
            RETURNING request_count
            "#,
        )
        .bind(user_id)
        .bind(endpoint)
        .bind(window_start)
        .bind(i32::try_from(max).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map(|c| c.max(0) as u32))
    }

    async fn delete_windows_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

type WindowKey = (Uuid, String, DateTime<Utc>);

#[derive(Default)]
pub struct MemoryRateLimitStore {
    windows: Mutex<HashMap<WindowKey, u32>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn current_count(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let windows = self.windows.lock().await;
        Ok(windows
            .get(&(user_id, endpoint.to_string(), window_start))
            .copied()
            .unwrap_or(0))
    }

    async fn increment(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let mut windows = self.windows.lock().await;
        let count = windows
            .entry((user_id, endpoint.to_string(), window_start))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn increment_below(
        &self,
        user_id: Uuid,
        endpoint: &str,
        window_start: DateTime<Utc>,
        max: u32,
    ) -> Result<Option<u32>, AppError> {
        let mut windows = self.windows.lock().await;
        let count = windows
            .entry((user_id, endpoint.to_string(), window_start))
            .or_insert(0);
        if *count >= max {
            return Ok(None);
        }
        *count += 1;
        Ok(Some(*count))
    }

    async fn delete_windows_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|(_, _, start), _| *start >= cutoff);
        Ok((before - windows.len()) as u64)
    }
}
