//! Calendar and shift endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};

use shiftmirror_core::feed::CalendarId;
use shiftmirror_core::shift::{NewShift, ShiftEntry, ShiftId};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/calendars/{id}", delete(delete_calendar))
        .route("/calendars/{id}/shifts", get(list_shifts))
        .route("/shifts", post(create_shift))
        .route("/shifts/{id}", delete(delete_shift))
}

/// DELETE /calendars/:id - Remove a calendar's feeds and entries
async fn delete_calendar(
    State(state): State<AppState>,
    Path(id): Path<CalendarId>,
) -> Result<StatusCode, AppError> {
    let feeds = state.store().delete_calendar(id).await?;
    // Drop timers of the removed feeds.
    state.scheduler.reload().await?;

    tracing::info!(calendar_id = %id, feeds, "Calendar deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /calendars/:id/shifts - All entries, mirrored and hand-made
async fn list_shifts(
    State(state): State<AppState>,
    Path(id): Path<CalendarId>,
) -> Result<Json<Vec<ShiftEntry>>, AppError> {
    Ok(Json(state.store().list_shifts(id).await?))
}

/// POST /shifts - Add a hand-made entry
async fn create_shift(
    State(state): State<AppState>,
    Json(req): Json<NewShift>,
) -> Result<(StatusCode, Json<ShiftEntry>), AppError> {
    let entry = ShiftEntry::from(req);
    state.store().insert_shift(entry.clone()).await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /shifts/:id
///
/// Mirrored entries may be deleted too; the next sync of their feed recreates them.
async fn delete_shift(
    State(state): State<AppState>,
    Path(id): Path<ShiftId>,
) -> Result<StatusCode, AppError> {
    if !state.store().delete_shift(id).await? {
        return Err(AppError::not_found(format!("Shift {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}
