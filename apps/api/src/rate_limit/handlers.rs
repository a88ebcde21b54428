use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::rate_limit::RateLimitStatus;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RateLimitQuery {
    pub user_id: Uuid,
    pub endpoint: String,
}

/// GET /api/v1/rate-limit?user_id=&endpoint=
///
/// Reports the caller's budget for an endpoint without consuming it.
pub async fn handle_check_rate_limit(
    State(state): State<AppState>,
    Query(params): Query<RateLimitQuery>,
) -> Result<Json<RateLimitStatus>, AppError> {
    if params.endpoint.trim().is_empty() {
        return Err(AppError::Validation("endpoint cannot be empty".to_string()));
    }

    let status = state
        .rate_limiter
        .check_rate_limit(params.user_id, params.endpoint.trim())
        .await?;

    Ok(Json(status))
}
