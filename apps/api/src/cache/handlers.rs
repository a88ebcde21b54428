use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use crate::cache::CacheInvalidation;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: u64,
}

/// DELETE /api/v1/cache
///
/// Body is either `{"key": "..."}` or `{"prefix": "..."}`.
pub async fn handle_invalidate(
    State(state): State<AppState>,
    Json(target): Json<CacheInvalidation>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let empty = match &target {
        CacheInvalidation::Key(k) => k.trim().is_empty(),
        CacheInvalidation::Prefix(p) => p.trim().is_empty(),
    };
    if empty {
        return Err(AppError::Validation(
            "Cache key or prefix cannot be empty".to_string(),
        ));
    }

    let removed = state.cache.invalidate(&target).await?;
    info!(?target, removed, "Cache invalidated");

    Ok(Json(InvalidateResponse { removed }))
}
