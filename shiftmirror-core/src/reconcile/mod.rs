//! Feed reconciliation.
//!
//! One run fetches a feed, expands and splits its events into candidate entries, diffs them
//! against what is mirrored and commits the result as a single change set. Runs for the same
//! feed are serialized with a per-feed lock; runs for different feeds proceed concurrently.

mod plan;

pub use plan::{DiffKind, EntryDiff, ReconcilePlan};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

use crate::clock::Clock;
use crate::config::MirrorConfig;
use crate::constants::{
    DEFAULT_FALLBACK_TITLE, DEFAULT_FETCH_TIMEOUT, DEFAULT_WINDOW_FUTURE_MONTHS,
    DEFAULT_WINDOW_PAST_MONTHS,
};
use crate::error::{MirrorError, MirrorResult};
use crate::expand::{Occurrence, SyncWindow, expand_document};
use crate::feed::{CalendarId, FeedConfig, FeedId, NewFeed, NewImport, SourceKind};
use crate::fetch::{FeedFetcher, validate_feed_url, within};
use crate::ics::parse_document;
use crate::identity::BaseId;
use crate::notify::{ChangeEvent, ChangeKind, Notifier};
use crate::shift::MirroredCandidate;
use crate::split::split_days;
use crate::store::MirrorStore;
use crate::sync_run::{SyncRun, SyncSummary, TriggerKind};

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub window_past_months: u32,
    pub window_future_months: u32,
    pub display_tz: Tz,
    pub fallback_title: String,
    /// Bounds URL validation, which may hit DNS for custom feeds.
    pub fetch_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            window_past_months: DEFAULT_WINDOW_PAST_MONTHS,
            window_future_months: DEFAULT_WINDOW_FUTURE_MONTHS,
            display_tz: chrono_tz::UTC,
            fallback_title: DEFAULT_FALLBACK_TITLE.to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl ReconcileSettings {
    pub fn from_config(config: &MirrorConfig) -> MirrorResult<Self> {
        Ok(ReconcileSettings {
            window_past_months: config.window_past_months,
            window_future_months: config.window_future_months,
            display_tz: config.display_tz()?,
            fallback_title: config.fallback_title.clone(),
            fetch_timeout: config.fetch_timeout,
        })
    }
}

#[derive(Default)]
struct FeedLocks(Mutex<HashMap<FeedId, Arc<Mutex<()>>>>);

impl FeedLocks {
    async fn acquire(&self, feed_id: FeedId) -> OwnedMutexGuard<()> {
        let lock = self.0.lock().await.entry(feed_id).or_default().clone();
        lock.lock_owned().await
    }

    async fn forget(&self, feed_id: FeedId) {
        self.0.lock().await.remove(&feed_id);
    }
}

pub struct Reconciler {
    store: Arc<dyn MirrorStore>,
    fetcher: Arc<dyn FeedFetcher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: ReconcileSettings,
    locks: FeedLocks,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        fetcher: Arc<dyn FeedFetcher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: ReconcileSettings,
    ) -> Self {
        Reconciler {
            store,
            fetcher,
            notifier,
            clock,
            settings,
            locks: FeedLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validate the URL and store a new URL-backed feed. It is not synced yet.
    pub async fn create_feed(
        &self,
        calendar_id: CalendarId,
        input: NewFeed,
    ) -> MirrorResult<FeedConfig> {
        let url = self.validate(&input.source_url, input.source_kind).await?;

        let mut feed = FeedConfig::new(calendar_id, input, self.clock.now());
        feed.source_url = Some(url.to_string());

        self.store.insert_feed(feed.clone()).await?;
        tracing::info!(feed_id = %feed.id, url = %url, "Feed created");

        Ok(feed)
    }

    /// Delete a feed and everything mirrored from it. Waits for an in-flight run to finish.
    pub async fn delete_feed(&self, feed_id: FeedId) -> MirrorResult<bool> {
        let deleted = {
            let _guard = self.locks.acquire(feed_id).await;
            self.store.delete_feed(feed_id).await?
        };
        self.locks.forget(feed_id).await;
        Ok(deleted)
    }

    /// Run one reconciliation and record its outcome.
    pub async fn reconcile(
        &self,
        feed_id: FeedId,
        trigger: TriggerKind,
    ) -> MirrorResult<SyncSummary> {
        let outcome = {
            let _guard = self.locks.acquire(feed_id).await;
            self.fetch_and_apply(feed_id).await
        };

        self.record(feed_id, trigger, &outcome).await;
        outcome
    }

    /// Create a one-time-import feed from uploaded text and mirror its contents.
    pub async fn import_document(
        &self,
        calendar_id: CalendarId,
        input: NewImport,
    ) -> MirrorResult<(FeedConfig, SyncSummary)> {
        // Reject garbage before creating anything.
        parse_document(&input.content)?;

        let mut feed =
            FeedConfig::one_time_import(calendar_id, input.name, input.color, self.clock.now());
        feed.display_mode = input.display_mode;
        self.store.insert_feed(feed.clone()).await?;

        let outcome = {
            let _guard = self.locks.acquire(feed.id).await;
            self.apply_document(&feed, &input.content).await
        };

        match outcome {
            Ok(summary) => {
                self.record(feed.id, TriggerKind::Manual, &Ok(summary)).await;
                Ok((feed, summary))
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete_feed(feed.id).await {
                    tracing::warn!(feed_id = %feed.id, error = %cleanup, "Failed to remove import");
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_apply(&self, feed_id: FeedId) -> MirrorResult<SyncSummary> {
        let feed = self
            .store
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| MirrorError::NotFound(format!("Feed {feed_id}")))?;

        if feed.is_one_time_import {
            return Err(MirrorError::Validation(
                "One-time imports cannot be re-synced".into(),
            ));
        }
        let source_url = feed
            .source_url
            .as_deref()
            .ok_or_else(|| MirrorError::Validation(format!("Feed {feed_id} has no source URL")))?;

        let url = self.validate(source_url, feed.source_kind).await?;
        let content = self.fetcher.fetch(&url).await?;

        self.apply_document(&feed, &content).await
    }

    async fn validate(&self, raw: &str, kind: SourceKind) -> MirrorResult<Url> {
        within(self.settings.fetch_timeout, validate_feed_url(raw, kind)).await
    }

    async fn apply_document(&self, feed: &FeedConfig, content: &str) -> MirrorResult<SyncSummary> {
        let events = parse_document(content)?;

        let now = self.clock.now();
        let window = SyncWindow::around(
            now,
            self.settings.window_past_months,
            self.settings.window_future_months,
        );
        let occurrences = expand_document(&events, &window, self.settings.display_tz)?;
        let candidates = self.candidates(feed, &occurrences);

        let existing = self.store.list_mirrored(feed.id).await?;
        let plan = ReconcilePlan::compute(candidates, existing);
        let (created, updated, deleted) = plan.counts();

        self.store.commit(plan.into_change_set(feed, now)).await?;

        self.notifier.publish(ChangeEvent {
            kind: ChangeKind::ShiftCollectionChanged,
            calendar_id: feed.calendar_id,
            payload: serde_json::json!({
                "feed_id": feed.id,
                "created": created,
                "updated": updated,
                "deleted": deleted,
            }),
        });

        Ok(SyncSummary {
            created,
            updated,
            deleted,
            total_occurrences: occurrences.len(),
        })
    }

    fn candidates(&self, feed: &FeedConfig, occurrences: &[Occurrence]) -> Vec<MirroredCandidate> {
        let mut candidates = Vec::new();

        for occurrence in occurrences {
            let event = occurrence.event;
            let slices = split_days(occurrence.start, occurrence.end, occurrence.all_day);
            let base = BaseId::new(&event.uid, occurrence.recurrence_marker.as_deref());
            let title = event
                .summary
                .as_deref()
                .unwrap_or(&self.settings.fallback_title);

            for slice in &slices {
                candidates.push(MirroredCandidate::from_slice(
                    base.for_day(slice.day_index, slices.len()),
                    slice,
                    title,
                    event.description.as_deref(),
                    &feed.color,
                    occurrence.all_day,
                ));
            }
        }

        candidates
    }

    async fn record(
        &self,
        feed_id: FeedId,
        trigger: TriggerKind,
        outcome: &MirrorResult<SyncSummary>,
    ) {
        let now = self.clock.now();

        let run = match outcome {
            Ok(summary) => {
                tracing::info!(
                    %feed_id,
                    %trigger,
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    occurrences = summary.total_occurrences,
                    "Feed synced"
                );
                SyncRun::success(feed_id, trigger, summary, now)
            }
            // Nothing to attach a run to.
            Err(MirrorError::NotFound(_)) => return,
            Err(e) => {
                tracing::warn!(%feed_id, %trigger, kind = e.kind(), error = %e, "Feed sync failed");
                SyncRun::failure(feed_id, trigger, e, now)
            }
        };

        if let Err(e) = self.store.append_sync_run(run).await {
            tracing::warn!(%feed_id, error = %e, "Failed to record sync run");
        }
    }
}
