pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::cache::handlers as cache_handlers;
use crate::jobs::handlers as job_handlers;
use crate::rate_limit::handlers as rate_limit_handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Jobs API
        .route(
            "/api/v1/jobs",
            post(job_handlers::handle_create_job).get(job_handlers::handle_list_jobs),
        )
        .route(
            "/api/v1/jobs/process",
            post(job_handlers::handle_process_jobs),
        )
        .route("/api/v1/jobs/:id", get(job_handlers::handle_get_job))
        .route(
            "/api/v1/jobs/:id/retry",
            post(job_handlers::handle_retry_job),
        )
        // Rate limit + cache
        .route(
            "/api/v1/rate-limit",
            get(rate_limit_handlers::handle_check_rate_limit),
        )
        .route("/api/v1/cache", delete(cache_handlers::handle_invalidate))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::cache::store::MemoryCacheStore;
    use crate::cache::{cache_key, Cache};
    use crate::config::{Config, StorageBackend};
    use crate::jobs::processor::tests::ScriptedProvider;
    use crate::jobs::processor::JobProcessor;
    use crate::jobs::queue::JobQueue;
    use crate::jobs::store::MemoryJobStore;
    use crate::jobs::worker::JobTrigger;
    use crate::rate_limit::store::MemoryRateLimitStore;
    use crate::rate_limit::{RateLimitPolicy, RateLimiter};

    fn test_config() -> Config {
        Config {
            storage_backend: StorageBackend::Memory,
            database_url: None,
            gemini_api_key: "test-key".to_string(),
            port: 0,
            rust_log: "debug".to_string(),
            job_batch_size: 10,
            job_max_retries: 3,
            worker_poll_interval: Duration::from_secs(5),
            job_stale_after: Duration::from_secs(300),
            job_retry_backoff: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(3600),
            rate_limit_max_requests: 10,
            // Wide window so a test never straddles a boundary.
            rate_limit_window: Duration::from_secs(3600),
            rate_limit_overrides: Vec::new(),
        }
    }

    fn test_state(provider: ScriptedProvider) -> AppState {
        let config = test_config();
        let cache = Cache::new(Arc::new(MemoryCacheStore::new()));
        let queue = JobQueue::new(Arc::new(MemoryJobStore::new()), config.job_max_retries)
            .with_retry_backoff(config.job_retry_backoff);
        let processor = Arc::new(JobProcessor::new(
            queue.clone(),
            Arc::new(provider),
            cache.clone(),
            config.cache_ttl,
        ));
        AppState {
            queue,
            processor,
            rate_limiter: RateLimiter::new(
                Arc::new(MemoryRateLimitStore::new()),
                RateLimitPolicy {
                    max_requests: config.rate_limit_max_requests,
                    window: config.rate_limit_window,
                },
            ),
            cache,
            trigger: JobTrigger::new(),
            config,
        }
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn cover_letter_request(user_id: Uuid) -> Value {
        json!({
            "user_id": user_id,
            "job_type": "cover_letter",
            "input": {"job_description": "Senior Rust engineer for payments", "tone": "formal"},
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state(ScriptedProvider::new(vec![])));
        let (status, body) = send(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_job_then_process_then_fetch() {
        let state = test_state(ScriptedProvider::always_ok("Dear team, ...", 1));
        let app = build_router(state);
        let user = Uuid::new_v4();

        let (status, body) =
            send(app.clone(), "POST", "/api/v1/jobs", Some(cover_letter_request(user))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["cached"], false);
        assert_eq!(body["job"]["status"], "pending");
        let job_id = body["job"]["id"].as_str().unwrap().to_string();

        let (status, summary) = send(app.clone(), "POST", "/api/v1/jobs/process", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["completed"], 1);

        let (status, job) = send(app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "completed");
        assert_eq!(job["result"], "Dear team, ...");
    }

    #[tokio::test]
    async fn test_cached_result_skips_queue() {
        let state = test_state(ScriptedProvider::new(vec![]));
        let request = cover_letter_request(Uuid::new_v4());
        let key = cache_key("cover_letter", &request["input"]);
        state
            .cache
            .set(&key, &json!("cached letter"), Duration::from_secs(60))
            .await
            .unwrap();
        let queue = state.queue.clone();
        let user = request["user_id"].as_str().unwrap().parse::<Uuid>().unwrap();

        let (status, body) = send(build_router(state), "POST", "/api/v1/jobs", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], true);
        assert_eq!(body["result"], "cached letter");
        assert!(queue.list_jobs(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_queue() {
        let state = test_state(ScriptedProvider::new(vec![]));
        let queue = state.queue.clone();
        let user = Uuid::new_v4();
        let request = json!({
            "user_id": user,
            "job_type": "cover_letter",
            "input": {"job_description": ""},
        });

        let (status, body) = send(build_router(state), "POST", "/api/v1/jobs", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(queue.list_jobs(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eleventh_request_in_a_window_is_rate_limited() {
        let app = build_router(test_state(ScriptedProvider::new(vec![])));
        let user = Uuid::new_v4();

        for n in 0..10 {
            let request = json!({
                "user_id": user,
                "job_type": "content_optimization",
                "input": {"content": format!("bullet {n}")},
            });
            let (status, _) = send(app.clone(), "POST", "/api/v1/jobs", Some(request)).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }

        let request = json!({
            "user_id": user,
            "job_type": "content_optimization",
            "input": {"content": "bullet 10"},
        });
        let (status, body) = send(app.clone(), "POST", "/api/v1/jobs", Some(request)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");

        let (status, body) = send(
            app,
            "GET",
            &format!("/api/v1/rate-limit?user_id={user}&endpoint=content_optimization"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], false);
        assert_eq!(body["remaining"], 0);
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_404() {
        let app = build_router(test_state(ScriptedProvider::new(vec![])));
        let (status, body) =
            send(app, "GET", &format!("/api/v1/jobs/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_retry_of_pending_job_is_rejected() {
        let state = test_state(ScriptedProvider::new(vec![]));
        let job = state
            .queue
            .create_job(
                Uuid::new_v4(),
                crate::models::job::JobType::AtsAnalysis,
                json!({"resume_text": "a", "job_description": "b"}),
                0,
            )
            .await
            .unwrap();
        let (status, _) = send(
            build_router(state),
            "POST",
            &format!("/api/v1/jobs/{}/retry", job.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalidate_cache_prefix() {
        let state = test_state(ScriptedProvider::new(vec![]));
        let ttl = Duration::from_secs(60);
        state.cache.set("cover_letter:a", &json!(1), ttl).await.unwrap();
        state.cache.set("cover_letter:b", &json!(2), ttl).await.unwrap();

        let (status, body) = send(
            build_router(state),
            "DELETE",
            "/api/v1/cache",
            Some(json!({"prefix": "cover_letter:"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 2);
    }
}
