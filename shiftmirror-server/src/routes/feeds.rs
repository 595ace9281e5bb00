//! Feed endpoints (subscribe, import, edit, delete, sync)

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use shiftmirror_core::feed::{CalendarId, FeedConfig, FeedId, FeedPatch, NewFeed, NewImport};
use shiftmirror_core::shift::ShiftEntry;
use shiftmirror_core::sync_run::SyncSummary;

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feeds", get(list_feeds).post(create_feed))
        .route("/feeds/import", post(import_feed))
        .route(
            "/feeds/{id}",
            get(get_feed).patch(update_feed).delete(delete_feed),
        )
        .route("/feeds/{id}/sync", post(sync_feed))
        .route("/feeds/{id}/entries", get(list_entries))
}

#[derive(Deserialize)]
pub struct FeedQuery {
    pub calendar_id: Option<CalendarId>,
}

/// GET /feeds - List feeds, optionally for one calendar
async fn list_feeds(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<FeedConfig>>, AppError> {
    let feeds = state
        .store()
        .list_feeds()
        .await?
        .into_iter()
        .filter(|feed| query.calendar_id.is_none_or(|id| id == feed.calendar_id))
        .collect();

    Ok(Json(feeds))
}

#[derive(Deserialize)]
pub struct CreateFeedRequest {
    pub calendar_id: CalendarId,
    #[serde(flatten)]
    pub feed: NewFeed,
}

/// POST /feeds - Subscribe a calendar to a URL feed
async fn create_feed(
    State(state): State<AppState>,
    Json(req): Json<CreateFeedRequest>,
) -> Result<(StatusCode, Json<FeedConfig>), AppError> {
    let feed = state.reconciler.create_feed(req.calendar_id, req.feed).await?;
    state.scheduler.refresh_feed(feed.id).await?;

    Ok((StatusCode::CREATED, Json(feed)))
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub calendar_id: CalendarId,
    #[serde(flatten)]
    pub import: NewImport,
}

#[derive(Serialize)]
pub struct ImportResult {
    pub feed: FeedConfig,
    pub summary: SyncSummary,
}

/// POST /feeds/import - Mirror an uploaded .ics document once
async fn import_feed(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> Result<(StatusCode, Json<ImportResult>), AppError> {
    let (feed, summary) = state
        .reconciler
        .import_document(req.calendar_id, req.import)
        .await?;

    Ok((StatusCode::CREATED, Json(ImportResult { feed, summary })))
}

/// GET /feeds/:id
async fn get_feed(
    State(state): State<AppState>,
    Path(id): Path<FeedId>,
) -> Result<Json<FeedConfig>, AppError> {
    let feed = state
        .store()
        .get_feed(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Feed {id}")))?;

    Ok(Json(feed))
}

/// PATCH /feeds/:id - Edit name, color, display mode or interval
async fn update_feed(
    State(state): State<AppState>,
    Path(id): Path<FeedId>,
    Json(patch): Json<FeedPatch>,
) -> Result<Json<FeedConfig>, AppError> {
    let feed = state.store().update_feed(id, patch).await?;
    state.scheduler.refresh_feed(id).await?;

    Ok(Json(feed))
}

/// DELETE /feeds/:id - Remove a feed and its mirrored entries
async fn delete_feed(
    State(state): State<AppState>,
    Path(id): Path<FeedId>,
) -> Result<StatusCode, AppError> {
    if !state.reconciler.delete_feed(id).await? {
        return Err(AppError::not_found(format!("Feed {id}")));
    }
    state.scheduler.refresh_feed(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /feeds/:id/sync - Sync now
async fn sync_feed(
    State(state): State<AppState>,
    Path(id): Path<FeedId>,
) -> Result<Json<SyncSummary>, AppError> {
    let summary = state.scheduler.trigger_manual(id).await?;
    Ok(Json(summary))
}

/// GET /feeds/:id/entries - Entries currently mirrored from a feed
async fn list_entries(
    State(state): State<AppState>,
    Path(id): Path<FeedId>,
) -> Result<Json<Vec<ShiftEntry>>, AppError> {
    Ok(Json(state.store().list_mirrored(id).await?))
}
