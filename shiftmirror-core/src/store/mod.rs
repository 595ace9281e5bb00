//! Persistence boundary.
//!
//! The reconciler only ever mutates mirrored entries through [`MirrorStore::commit`], which
//! must apply a whole [`ChangeSet`] or nothing.

mod json;

pub use json::JsonStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MirrorResult;
use crate::feed::{CalendarId, FeedConfig, FeedId, FeedPatch};
use crate::shift::{ShiftEntry, ShiftId};
use crate::sync_run::{SyncRun, SyncRunFilter, SyncRunId};

/// Everything one reconciliation writes.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub feed_id: FeedId,
    pub inserts: Vec<ShiftEntry>,
    /// Full rows, matched to existing entries by id.
    pub updates: Vec<ShiftEntry>,
    pub deletes: Vec<ShiftId>,
    pub last_synced_at: DateTime<Utc>,
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get_feed(&self, id: FeedId) -> MirrorResult<Option<FeedConfig>>;

    async fn list_feeds(&self) -> MirrorResult<Vec<FeedConfig>>;

    async fn insert_feed(&self, feed: FeedConfig) -> MirrorResult<()>;

    /// Apply `patch` to the stored feed and return the result.
    async fn update_feed(&self, id: FeedId, patch: FeedPatch) -> MirrorResult<FeedConfig>;

    /// Remove a feed and every entry mirrored from it. Returns false if it did not exist.
    async fn delete_feed(&self, id: FeedId) -> MirrorResult<bool>;

    /// Remove a calendar's feeds and all of its entries. Returns the number of feeds removed.
    async fn delete_calendar(&self, id: CalendarId) -> MirrorResult<usize>;

    async fn list_mirrored(&self, feed_id: FeedId) -> MirrorResult<Vec<ShiftEntry>>;

    async fn list_shifts(&self, calendar_id: CalendarId) -> MirrorResult<Vec<ShiftEntry>>;

    async fn insert_shift(&self, entry: ShiftEntry) -> MirrorResult<()>;

    async fn delete_shift(&self, id: ShiftId) -> MirrorResult<bool>;

    async fn commit(&self, changes: ChangeSet) -> MirrorResult<()>;

    async fn append_sync_run(&self, run: SyncRun) -> MirrorResult<()>;

    /// Newest first.
    async fn list_sync_runs(&self, filter: SyncRunFilter) -> MirrorResult<Vec<SyncRun>>;

    async fn mark_sync_run_read(&self, id: SyncRunId) -> MirrorResult<bool>;
}
