//! Snapshot store backed by a single JSON file.
//!
//! All state lives in memory. Every mutation is applied to a copy, written to
//! `<path>.tmp` and renamed over `<path>`, then swapped in, so neither readers nor a crash
//! can observe a half-applied change. The sync run log is capped per feed so the snapshot
//! stays proportional to the number of feeds rather than to uptime.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants::SYNC_RUN_RETENTION;
use crate::error::{MirrorError, MirrorResult};
use crate::feed::{CalendarId, FeedConfig, FeedId, FeedPatch};
use crate::shift::{ShiftEntry, ShiftId};
use crate::store::{ChangeSet, MirrorStore};
use crate::sync_run::{SyncRun, SyncRunFilter, SyncRunId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    feeds: BTreeMap<FeedId, FeedConfig>,
    #[serde(default)]
    shifts: BTreeMap<ShiftId, ShiftEntry>,
    #[serde(default)]
    sync_runs: Vec<SyncRun>,
}

pub struct JsonStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
    run_retention: usize,
}

fn persistence_err(path: &Path, e: std::io::Error) -> MirrorError {
    MirrorError::Persistence(format!("{}: {e}", path.display()))
}

impl JsonStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        JsonStore {
            path: None,
            data: RwLock::new(StoreData::default()),
            run_retention: SYNC_RUN_RETENTION,
        }
    }

    /// Load the snapshot at `path`, or start empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> MirrorResult<Self> {
        let path = path.into();

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(persistence_err(&path, e)),
        };

        tracing::debug!(path = %path.display(), "Opened store");

        Ok(JsonStore {
            path: Some(path),
            data: RwLock::new(data),
            run_retention: SYNC_RUN_RETENTION,
        })
    }

    /// Keep at most `runs` sync runs per feed.
    pub fn with_run_retention(mut self, runs: usize) -> Self {
        self.run_retention = runs.max(1);
        self
    }

    async fn persist(&self, data: &StoreData) -> MirrorResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_err(parent, e))?;
        }

        let content = serde_json::to_vec_pretty(data)?;
        let temp = path.with_extension("json.tmp");

        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| persistence_err(&temp, e))?;
        tokio::fs::rename(&temp, path)
            .await
            .map_err(|e| persistence_err(path, e))?;

        Ok(())
    }

    /// Run `f` against a copy of the data and swap it in once persisted.
    async fn mutate<T, F>(&self, f: F) -> MirrorResult<T>
    where
        F: FnOnce(&mut StoreData) -> MirrorResult<T> + Send,
        T: Send,
    {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *data = next;
        Ok(out)
    }
}

fn apply_change_set(data: &mut StoreData, changes: ChangeSet) -> MirrorResult<()> {
    let feed_id = changes.feed_id;
    let feed = data
        .feeds
        .get_mut(&feed_id)
        .ok_or_else(|| MirrorError::NotFound(format!("Feed {feed_id}")))?;
    feed.last_synced_at = Some(changes.last_synced_at);

    let owned_by_feed = |shifts: &BTreeMap<ShiftId, ShiftEntry>, id: &ShiftId| {
        shifts.get(id).is_some_and(|e| e.is_mirrored_by(feed_id))
    };

    for id in &changes.deletes {
        if !owned_by_feed(&data.shifts, id) {
            return Err(MirrorError::Persistence(format!(
                "Cannot delete {id}: not mirrored by feed {feed_id}"
            )));
        }
        data.shifts.remove(id);
    }

    for entry in changes.updates {
        if !owned_by_feed(&data.shifts, &entry.id) {
            return Err(MirrorError::Persistence(format!(
                "Cannot update {}: not mirrored by feed {feed_id}",
                entry.id
            )));
        }
        data.shifts.insert(entry.id, entry);
    }

    for entry in changes.inserts {
        if data.shifts.contains_key(&entry.id) {
            return Err(MirrorError::Persistence(format!(
                "Entry {} already exists",
                entry.id
            )));
        }
        data.shifts.insert(entry.id, entry);
    }

    let mut seen = HashSet::new();
    let external_ids = data
        .shifts
        .values()
        .filter(|e| e.is_mirrored_by(feed_id))
        .filter_map(|e| e.external_event_id.as_deref());
    for external_id in external_ids {
        if !seen.insert(external_id) {
            return Err(MirrorError::Persistence(format!(
                "Duplicate external event id '{external_id}' for feed {feed_id}"
            )));
        }
    }

    Ok(())
}

/// Drop the oldest runs of `feed_id` beyond `keep`. Runs are stored oldest first.
fn prune_sync_runs(runs: &mut Vec<SyncRun>, feed_id: FeedId, keep: usize) {
    let count = runs.iter().filter(|run| run.feed_id == feed_id).count();
    let mut excess = count.saturating_sub(keep);
    if excess == 0 {
        return;
    }

    runs.retain(|run| {
        if excess > 0 && run.feed_id == feed_id {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

fn sort_by_schedule(entries: &mut [ShiftEntry]) {
    entries.sort_by(|a, b| {
        (a.date, &a.start_time, &a.external_event_id).cmp(&(
            b.date,
            &b.start_time,
            &b.external_event_id,
        ))
    });
}

#[async_trait]
impl MirrorStore for JsonStore {
    async fn get_feed(&self, id: FeedId) -> MirrorResult<Option<FeedConfig>> {
        Ok(self.data.read().await.feeds.get(&id).cloned())
    }

    async fn list_feeds(&self) -> MirrorResult<Vec<FeedConfig>> {
        let mut feeds: Vec<_> = self.data.read().await.feeds.values().cloned().collect();
        feeds.sort_by_key(|f| f.created_at);
        Ok(feeds)
    }

    async fn insert_feed(&self, feed: FeedConfig) -> MirrorResult<()> {
        self.mutate(move |data| {
            if data.feeds.contains_key(&feed.id) {
                return Err(MirrorError::Persistence(format!(
                    "Feed {} already exists",
                    feed.id
                )));
            }
            data.feeds.insert(feed.id, feed);
            Ok(())
        })
        .await
    }

    async fn update_feed(&self, id: FeedId, patch: FeedPatch) -> MirrorResult<FeedConfig> {
        self.mutate(move |data| {
            let feed = data
                .feeds
                .get_mut(&id)
                .ok_or_else(|| MirrorError::NotFound(format!("Feed {id}")))?;
            feed.apply_patch(patch)?;
            Ok(feed.clone())
        })
        .await
    }

    async fn delete_feed(&self, id: FeedId) -> MirrorResult<bool> {
        self.mutate(move |data| {
            if data.feeds.remove(&id).is_none() {
                return Ok(false);
            }
            data.shifts.retain(|_, e| !e.is_mirrored_by(id));
            data.sync_runs.retain(|run| run.feed_id != id);
            Ok(true)
        })
        .await
    }

    async fn delete_calendar(&self, id: CalendarId) -> MirrorResult<usize> {
        self.mutate(move |data| {
            let before = data.feeds.len();
            data.feeds.retain(|_, f| f.calendar_id != id);
            data.shifts.retain(|_, e| e.calendar_id != id);
            let feeds = &data.feeds;
            data.sync_runs.retain(|run| feeds.contains_key(&run.feed_id));
            Ok(before - data.feeds.len())
        })
        .await
    }

    async fn list_mirrored(&self, feed_id: FeedId) -> MirrorResult<Vec<ShiftEntry>> {
        let mut entries: Vec<_> = self
            .data
            .read()
            .await
            .shifts
            .values()
            .filter(|e| e.is_mirrored_by(feed_id))
            .cloned()
            .collect();
        sort_by_schedule(&mut entries);
        Ok(entries)
    }

    async fn list_shifts(&self, calendar_id: CalendarId) -> MirrorResult<Vec<ShiftEntry>> {
        let mut entries: Vec<_> = self
            .data
            .read()
            .await
            .shifts
            .values()
            .filter(|e| e.calendar_id == calendar_id)
            .cloned()
            .collect();
        sort_by_schedule(&mut entries);
        Ok(entries)
    }

    async fn insert_shift(&self, entry: ShiftEntry) -> MirrorResult<()> {
        self.mutate(move |data| {
            data.shifts.insert(entry.id, entry);
            Ok(())
        })
        .await
    }

    async fn delete_shift(&self, id: ShiftId) -> MirrorResult<bool> {
        self.mutate(move |data| Ok(data.shifts.remove(&id).is_some()))
            .await
    }

    async fn commit(&self, changes: ChangeSet) -> MirrorResult<()> {
        self.mutate(move |data| apply_change_set(data, changes)).await
    }

    async fn append_sync_run(&self, run: SyncRun) -> MirrorResult<()> {
        let keep = self.run_retention;
        self.mutate(move |data| {
            let feed_id = run.feed_id;
            data.sync_runs.push(run);
            prune_sync_runs(&mut data.sync_runs, feed_id, keep);
            Ok(())
        })
        .await
    }

    async fn list_sync_runs(&self, filter: SyncRunFilter) -> MirrorResult<Vec<SyncRun>> {
        Ok(self
            .data
            .read()
            .await
            .sync_runs
            .iter()
            .rev()
            .filter(|run| filter.matches(run))
            .cloned()
            .collect())
    }

    async fn mark_sync_run_read(&self, id: SyncRunId) -> MirrorResult<bool> {
        self.mutate(move |data| {
            Ok(match data.sync_runs.iter_mut().find(|run| run.id == id) {
                Some(run) => {
                    run.read = true;
                    true
                }
                None => false,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DisplayMode, NewFeed, SourceKind, SyncInterval};
    use crate::shift::NewShift;
    use crate::sync_run::{SyncSummary, TriggerKind};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn feed(calendar_id: CalendarId) -> FeedConfig {
        FeedConfig::new(
            calendar_id,
            NewFeed {
                source_url: "https://example.com/cal.ics".into(),
                source_kind: SourceKind::Custom,
                name: "Work".into(),
                color: "#ff0000".into(),
                display_mode: DisplayMode::Normal,
                auto_sync_interval: SyncInterval::MANUAL,
            },
            Utc::now(),
        )
    }

    fn mirrored(feed: &FeedConfig, external_id: &str) -> ShiftEntry {
        ShiftEntry {
            id: Uuid::new_v4(),
            calendar_id: feed.calendar_id,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            start_time: "09:00".into(),
            end_time: "17:00".into(),
            title: "Shift".into(),
            color: feed.color.clone(),
            notes: None,
            all_day: false,
            external_feed_id: Some(feed.id),
            external_event_id: Some(external_id.to_string()),
            mirrored_from_external: true,
        }
    }

    fn human(calendar_id: CalendarId) -> ShiftEntry {
        ShiftEntry::from(NewShift {
            calendar_id,
            date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            start_time: "08:00".into(),
            end_time: "12:00".into(),
            title: "Dentist".into(),
            color: "#00ff00".into(),
            notes: None,
            all_day: false,
        })
    }

    fn change_set(feed: &FeedConfig) -> ChangeSet {
        ChangeSet {
            feed_id: feed.id,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            last_synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_applies_all_parts() {
        let store = JsonStore::in_memory();
        let feed = feed(Uuid::new_v4());
        store.insert_feed(feed.clone()).await.unwrap();

        let keep = mirrored(&feed, "keep");
        let gone = mirrored(&feed, "gone");
        store
            .commit(ChangeSet {
                inserts: vec![keep.clone(), gone.clone()],
                ..change_set(&feed)
            })
            .await
            .unwrap();

        let mut renamed = keep.clone();
        renamed.title = "Late shift".into();
        let at = Utc::now();
        store
            .commit(ChangeSet {
                inserts: vec![mirrored(&feed, "new")],
                updates: vec![renamed],
                deletes: vec![gone.id],
                last_synced_at: at,
                ..change_set(&feed)
            })
            .await
            .unwrap();

        let entries = store.list_mirrored(feed.id).await.unwrap();
        let ids: HashSet<_> = entries
            .iter()
            .filter_map(|e| e.external_event_id.as_deref())
            .collect();
        assert_eq!(ids, HashSet::from(["keep", "new"]));
        assert!(entries.iter().any(|e| e.title == "Late shift"));
        assert_eq!(
            store.get_feed(feed.id).await.unwrap().unwrap().last_synced_at,
            Some(at)
        );
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_partial_state() {
        let store = JsonStore::in_memory();
        let feed = feed(Uuid::new_v4());
        store.insert_feed(feed.clone()).await.unwrap();

        let existing = mirrored(&feed, "a");
        store
            .commit(ChangeSet {
                inserts: vec![existing.clone()],
                ..change_set(&feed)
            })
            .await
            .unwrap();
        let synced_at = store.get_feed(feed.id).await.unwrap().unwrap().last_synced_at;

        // Delete is valid, the update target is not.
        let err = store
            .commit(ChangeSet {
                inserts: vec![mirrored(&feed, "b")],
                updates: vec![mirrored(&feed, "ghost")],
                deletes: vec![existing.id],
                ..change_set(&feed)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Persistence(_)));

        let entries = store.list_mirrored(feed.id).await.unwrap();
        assert_eq!(entries, vec![existing]);
        assert_eq!(
            store.get_feed(feed.id).await.unwrap().unwrap().last_synced_at,
            synced_at
        );
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_external_ids() {
        let store = JsonStore::in_memory();
        let feed = feed(Uuid::new_v4());
        store.insert_feed(feed.clone()).await.unwrap();

        let err = store
            .commit(ChangeSet {
                inserts: vec![mirrored(&feed, "same"), mirrored(&feed, "same")],
                ..change_set(&feed)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Persistence(_)));
        assert!(store.list_mirrored(feed.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_cannot_touch_human_entries() {
        let store = JsonStore::in_memory();
        let feed = feed(Uuid::new_v4());
        store.insert_feed(feed.clone()).await.unwrap();
        let manual = human(feed.calendar_id);
        store.insert_shift(manual.clone()).await.unwrap();

        let err = store
            .commit(ChangeSet {
                deletes: vec![manual.id],
                ..change_set(&feed)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Persistence(_)));
        assert_eq!(store.list_shifts(feed.calendar_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_feed_and_calendar_cascade() {
        let store = JsonStore::in_memory();
        let calendar_id = Uuid::new_v4();
        let first = feed(calendar_id);
        let second = feed(calendar_id);
        store.insert_feed(first.clone()).await.unwrap();
        store.insert_feed(second.clone()).await.unwrap();
        store.insert_shift(human(calendar_id)).await.unwrap();
        for f in [&first, &second] {
            store
                .commit(ChangeSet {
                    inserts: vec![mirrored(f, "x")],
                    ..change_set(f)
                })
                .await
                .unwrap();
        }

        assert!(store.delete_feed(first.id).await.unwrap());
        assert!(!store.delete_feed(first.id).await.unwrap());
        assert!(store.list_mirrored(first.id).await.unwrap().is_empty());
        // Human entry and the other feed's entry survive.
        assert_eq!(store.list_shifts(calendar_id).await.unwrap().len(), 2);

        assert_eq!(store.delete_calendar(calendar_id).await.unwrap(), 1);
        assert!(store.list_feeds().await.unwrap().is_empty());
        assert!(store.list_shifts(calendar_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_runs_newest_first_and_filtered() {
        let store = JsonStore::in_memory();
        let feed_a = Uuid::new_v4();
        let feed_b = Uuid::new_v4();

        let summary = SyncSummary::default();
        let first = SyncRun::success(feed_a, TriggerKind::Manual, &summary, Utc::now());
        let second = SyncRun::failure(
            feed_b,
            TriggerKind::Automatic,
            &MirrorError::FetchTimeout(10),
            Utc::now(),
        );
        let third = SyncRun::success(feed_a, TriggerKind::Automatic, &summary, Utc::now());
        for run in [&first, &second, &third] {
            store.append_sync_run(run.clone()).await.unwrap();
        }

        let all = store.list_sync_runs(SyncRunFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![third.id, second.id, first.id]
        );

        assert!(store.mark_sync_run_read(third.id).await.unwrap());
        assert!(!store.mark_sync_run_read(Uuid::new_v4()).await.unwrap());

        let unread_a = store
            .list_sync_runs(SyncRunFilter {
                feed_id: Some(feed_a),
                unread: true,
            })
            .await
            .unwrap();
        assert_eq!(unread_a.len(), 1);
        assert_eq!(unread_a[0].id, first.id);
        assert_eq!(second.error_kind.as_deref(), Some("fetch_timeout"));
    }

    #[tokio::test]
    async fn test_sync_runs_pruned_per_feed() {
        let store = JsonStore::in_memory().with_run_retention(3);
        let busy = Uuid::new_v4();
        let quiet = Uuid::new_v4();
        let summary = SyncSummary::default();

        let kept = SyncRun::success(quiet, TriggerKind::Manual, &summary, Utc::now());
        store.append_sync_run(kept.clone()).await.unwrap();

        let mut busy_ids = Vec::new();
        for _ in 0..10 {
            let run = SyncRun::success(busy, TriggerKind::Automatic, &summary, Utc::now());
            busy_ids.push(run.id);
            store.append_sync_run(run).await.unwrap();
        }

        let busy_runs = store
            .list_sync_runs(SyncRunFilter {
                feed_id: Some(busy),
                unread: false,
            })
            .await
            .unwrap();
        assert_eq!(
            busy_runs.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![busy_ids[9], busy_ids[8], busy_ids[7]]
        );

        let all = store.list_sync_runs(SyncRunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.last().map(|r| r.id), Some(kept.id));
    }

    #[tokio::test]
    async fn test_delete_feed_drops_its_runs() {
        let store = JsonStore::in_memory();
        let calendar_id = Uuid::new_v4();
        let gone = feed(calendar_id);
        let stays = feed(calendar_id);
        store.insert_feed(gone.clone()).await.unwrap();
        store.insert_feed(stays.clone()).await.unwrap();

        let summary = SyncSummary::default();
        for id in [gone.id, stays.id] {
            let run = SyncRun::success(id, TriggerKind::Manual, &summary, Utc::now());
            store.append_sync_run(run).await.unwrap();
        }

        assert!(store.delete_feed(gone.id).await.unwrap());
        let runs = store.list_sync_runs(SyncRunFilter::default()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].feed_id, stays.id);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/store.json");

        let feed = feed(Uuid::new_v4());
        {
            let store = JsonStore::open(&path).await.unwrap();
            store.insert_feed(feed.clone()).await.unwrap();
            store
                .commit(ChangeSet {
                    inserts: vec![mirrored(&feed, "a")],
                    ..change_set(&feed)
                })
                .await
                .unwrap();
        }

        assert!(!path.with_extension("json.tmp").exists());

        let reopened = JsonStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_feed(feed.id).await.unwrap().unwrap().name, "Work");
        assert_eq!(reopened.list_mirrored(feed.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_feed_patch_validation() {
        let store = JsonStore::in_memory();
        let import =
            FeedConfig::one_time_import(Uuid::new_v4(), "Upload".into(), "#fff".into(), Utc::now());
        store.insert_feed(import.clone()).await.unwrap();

        let err = store
            .update_feed(
                import.id,
                FeedPatch {
                    auto_sync_interval: Some(SyncInterval::from_minutes(60).unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Validation(_)));

        let err = store
            .update_feed(Uuid::new_v4(), FeedPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::NotFound(_)));
    }
}
