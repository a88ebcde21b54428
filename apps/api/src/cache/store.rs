//! Storage backends for cache rows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::errors::AppError;
use crate::models::cache::CacheEntryRow;

/// Key/value rows with expiry. Expiry is enforced by the reader.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the row for `key` only if it is still live at `now`.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntryRow>, AppError>;

    async fn upsert(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn delete_key(&self, key: &str) -> Result<u64, AppError>;

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, AppError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntryRow>, AppError> {
        Ok(sqlx::query_as::<_, CacheEntryRow>(
            "SELECT * FROM ai_cache WHERE cache_key = $1 AND expires_at > $2",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ai_cache (cache_key, value, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cache_key)
            DO UPDATE SET value = EXCLUDED.value,
                          expires_at = EXCLUDED.expires_at,
                          created_at = EXCLUDED.created_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM ai_cache WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, AppError> {
        let pattern = format!("{}%", escape_like(prefix));
        let result = sqlx::query(r"DELETE FROM ai_cache WHERE cache_key LIKE $1 ESCAPE '\'")
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM ai_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Escapes LIKE metacharacters so a prefix matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntryRow>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntryRow>, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).filter(|e| e.is_live_at(now)).cloned())
    }

    async fn upsert(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.entries.lock().await.insert(
            key.to_string(),
            CacheEntryRow {
                cache_key: key.to_string(),
                value: value.clone(),
                expires_at,
                created_at: now,
            },
        );
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<u64, AppError> {
        Ok(self.entries.lock().await.remove(key).map_or(0, |_| 1))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, AppError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        Ok((before - entries.len()) as u64)
    }
}
