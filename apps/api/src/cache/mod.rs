//! AI result cache: skips redundant provider calls for identical inputs.
//!
//! Keys come from `cache_key(operation, params)`: the operation name followed
//! by the sorted `key=value` pairs of the normalized parameters. There is no
//! collision resistance beyond that.

pub mod handlers;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::store::CacheStore;
use crate::errors::AppError;

/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheInvalidation {
    Key(String),
    Prefix(String),
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Returns the cached value, or `None` on a miss or an expired row.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, AppError> {
        let hit = self.store.get(key, now).await?;
        debug!(cache_key = key, hit = hit.is_some(), "cache lookup");
        Ok(hit.map(|entry| entry.value))
    }

    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), AppError> {
        self.set_at(key, value, ttl, Utc::now()).await
    }

    pub async fn set_at(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| AppError::Validation(format!("Cache TTL {ttl:?} is out of range")))?;
        self.store.upsert(key, value, now + ttl, now).await
    }

    /// Deletes one key or every key under a prefix. Returns the number of rows removed.
    pub async fn invalidate(&self, target: &CacheInvalidation) -> Result<u64, AppError> {
        match target {
            CacheInvalidation::Key(key) => self.store.delete_key(key).await,
            CacheInvalidation::Prefix(prefix) => self.store.delete_prefix(prefix).await,
        }
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.store.delete_expired(Utc::now()).await
    }
}

/// Builds the deterministic cache key for an operation and its parameters.
///
/// Object parameters are flattened one level into `key=value` pairs sorted by
/// key and joined with `&`. Strings are trimmed with internal whitespace
/// collapsed; nulls are dropped; nested values use compact JSON.
pub fn cache_key(operation: &str, params: &Value) -> String {
    match params {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, String)> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, normalize_value(v)))
                .collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            let joined = pairs
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{operation}:{joined}")
        }
        Value::Null => format!("{operation}:"),
        other => format!("{operation}:{}", normalize_value(other)),
    }
}

fn normalize_value(value: &Value) -> String {
    match value {
        Value::String(s) => collapse_whitespace(s),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(&normalize_nested(value)).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

fn normalize_nested(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(collapse_whitespace(s)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_nested).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_nested(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryCacheStore;
    use serde_json::json;

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryCacheStore::new()))
    }

    #[test]
    fn test_cache_key_sorts_parameters() {
        let a = cache_key("cover_letter", &json!({"tone": "formal", "job_description": "Rust dev"}));
        let b = cache_key("cover_letter", &json!({"job_description": "Rust dev", "tone": "formal"}));
        assert_eq!(a, b);
        assert_eq!(a, "cover_letter:job_description=Rust dev&tone=formal");
    }

    #[test]
    fn test_cache_key_normalizes_whitespace() {
        let a = cache_key("content_optimization", &json!({"content": "  Led a   team\n of 4 "}));
        let b = cache_key("content_optimization", &json!({"content": "Led a team of 4"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_ignores_nulls() {
        let a = cache_key("ats_analysis", &json!({"resume_text": "x", "job_description": null}));
        let b = cache_key("ats_analysis", &json!({"resume_text": "x"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_differs_by_operation() {
        let params = json!({"content": "x"});
        assert_ne!(
            cache_key("content_optimization", &params),
            cache_key("resume_generation", &params)
        );
    }

    #[test]
    fn test_cache_key_nested_values_are_compact_json() {
        let key = cache_key("resume_generation", &json!({"skills": ["Rust", " Go "]}));
        assert_eq!(key, r#"resume_generation:skills=["Rust","Go"]"#);
    }

    #[tokio::test]
    async fn test_set_then_get_within_ttl_returns_value() {
        let cache = cache();
        let now = Utc::now();
        cache
            .set_at("k", &json!("letter"), Duration::from_secs(60), now)
            .await
            .unwrap();
        let hit = cache.get_at("k", now + chrono::Duration::seconds(59)).await.unwrap();
        assert_eq!(hit, Some(json!("letter")));
    }

    #[tokio::test]
    async fn test_get_after_ttl_is_miss() {
        let cache = cache();
        let now = Utc::now();
        cache
            .set_at("k", &json!("letter"), Duration::from_secs(60), now)
            .await
            .unwrap();
        let miss = cache.get_at("k", now + chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_key() {
        let cache = cache();
        cache.set("k", &json!(1), Duration::from_secs(60)).await.unwrap();
        cache.set("k", &json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_invalidate_by_key_and_prefix() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        cache.set("cover_letter:a", &json!(1), ttl).await.unwrap();
        cache.set("cover_letter:b", &json!(2), ttl).await.unwrap();
        cache.set("ats_analysis:a", &json!(3), ttl).await.unwrap();

        let removed = cache
            .invalidate(&CacheInvalidation::Key("cover_letter:a".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let removed = cache
            .invalidate(&CacheInvalidation::Prefix("cover_letter:".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get("ats_analysis:a").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_dead_rows() {
        let cache = cache();
        let past = Utc::now() - chrono::Duration::hours(2);
        cache.set_at("old", &json!(1), Duration::from_secs(60), past).await.unwrap();
        cache.set("fresh", &json!(2), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.get("fresh").await.unwrap(), Some(json!(2)));
    }
}
