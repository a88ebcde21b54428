use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One fixed window of request counting for a (user, endpoint) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateLimitRow {
    pub user_id: Uuid,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub request_count: i32,
}
