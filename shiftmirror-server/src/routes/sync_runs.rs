//! Sync run log endpoints

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};

use shiftmirror_core::sync_run::{SyncRun, SyncRunFilter, SyncRunId};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync-runs", get(list_sync_runs))
        .route("/sync-runs/{id}/read", post(mark_read))
}

/// GET /sync-runs?feed_id=&unread= - Newest first
async fn list_sync_runs(
    State(state): State<AppState>,
    Query(filter): Query<SyncRunFilter>,
) -> Result<Json<Vec<SyncRun>>, AppError> {
    Ok(Json(state.store().list_sync_runs(filter).await?))
}

/// POST /sync-runs/:id/read
async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<SyncRunId>,
) -> Result<StatusCode, AppError> {
    if !state.store().mark_sync_run_read(id).await? {
        return Err(AppError::not_found(format!("Sync run {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}
