//! Auto-sync scheduler.
//!
//! Keeps one timer per feed with a non-zero interval. The job table is rebuilt from stored
//! feed settings on start and on every reload tick, so it never needs to be persisted.
//! A firing timer hands the reconciliation to its own task; stopping the scheduler cancels
//! timers but lets in-flight runs finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::clock::Clock;
use crate::error::MirrorResult;
use crate::feed::{FeedConfig, FeedId, SyncInterval};
use crate::reconcile::Reconciler;
use crate::store::MirrorStore;
use crate::sync_run::{SyncSummary, TriggerKind};

/// When a feed should next run: right away if it never ran or is overdue, otherwise one
/// interval after its last successful sync.
pub fn next_run_at(
    last_synced_at: Option<DateTime<Utc>>,
    interval: SyncInterval,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match last_synced_at {
        Some(last) if last + interval.as_duration() > now => last + interval.as_duration(),
        _ => now,
    }
}

struct ScheduledJob {
    interval: SyncInterval,
    next_run_at: DateTime<Utc>,
    generation: u64,
    timer: AbortHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub feed_id: FeedId,
    pub interval_minutes: u32,
    pub next_run_at: DateTime<Utc>,
}

struct Inner {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn MirrorStore>,
    clock: Arc<dyn Clock>,
    reload_interval: Duration,
    jobs: Mutex<HashMap<FeedId, ScheduledJob>>,
    reload_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, reload_interval: Duration) -> Self {
        let store = reconciler.store().clone();
        let clock = reconciler.clock().clone();

        Scheduler {
            inner: Arc::new(Inner {
                reconciler,
                store,
                clock,
                reload_interval,
                jobs: Mutex::new(HashMap::new()),
                reload_task: Mutex::new(None),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Build the job table and start the periodic reload. Calling it twice is a no-op.
    pub async fn start(&self) -> MirrorResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.inner.reload().await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let period = inner.reload_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = inner.reload().await {
                    tracing::warn!(error = %e, "Scheduler reload failed");
                }
            }
        });
        *self.inner.reload_task.lock().await = Some(handle);

        tracing::info!(reload_interval = ?self.inner.reload_interval, "Scheduler started");
        Ok(())
    }

    /// Cancel the reload loop and every pending timer. Running reconciliations are left alone.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.inner.reload_task.lock().await.take() {
            handle.abort();
        }

        let mut jobs = self.inner.jobs.lock().await;
        for job in jobs.values() {
            job.timer.abort();
        }
        jobs.clear();

        tracing::info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Re-read all feeds now instead of waiting for the next reload tick.
    pub async fn reload(&self) -> MirrorResult<()> {
        self.inner.reload().await
    }

    /// Re-read one feed, e.g. right after its interval was edited.
    pub async fn refresh_feed(&self, feed_id: FeedId) -> MirrorResult<()> {
        if !self.is_running() {
            return Ok(());
        }

        let feed = self.inner.store.get_feed(feed_id).await?;
        let now = self.inner.clock.now();
        let mut jobs = self.inner.jobs.lock().await;
        self.inner.sync_job(&mut jobs, feed_id, feed.as_ref(), now);
        Ok(())
    }

    /// User-initiated sync. On success, a feed that is also auto-synced gets its timer
    /// restarted from the new `last_synced_at`.
    pub async fn trigger_manual(&self, feed_id: FeedId) -> MirrorResult<SyncSummary> {
        let summary = self
            .inner
            .reconciler
            .reconcile(feed_id, TriggerKind::Manual)
            .await?;

        if self.is_running() {
            let feed = self.inner.store.get_feed(feed_id).await?;
            let now = self.inner.clock.now();
            let mut jobs = self.inner.jobs.lock().await;

            let interval = jobs.get(&feed_id).map(|job| job.interval);
            if let (Some(interval), Some(feed)) = (interval, feed) {
                let next = next_run_at(feed.last_synced_at, interval, now);
                self.inner.schedule(&mut jobs, feed_id, interval, next, now);
            }
        }

        Ok(summary)
    }

    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        let jobs = self.inner.jobs.lock().await;
        let mut snapshot: Vec<_> = jobs
            .iter()
            .map(|(feed_id, job)| JobSnapshot {
                feed_id: *feed_id,
                interval_minutes: job.interval.minutes(),
                next_run_at: job.next_run_at,
            })
            .collect();
        snapshot.sort_by_key(|job| (job.next_run_at, job.feed_id));
        snapshot
    }
}

impl Inner {
    async fn reload(self: &Arc<Self>) -> MirrorResult<()> {
        let feeds: HashMap<FeedId, FeedConfig> = self
            .store
            .list_feeds()
            .await?
            .into_iter()
            .map(|feed| (feed.id, feed))
            .collect();
        let now = self.clock.now();

        let mut jobs = self.jobs.lock().await;

        let scheduled: Vec<FeedId> = jobs.keys().copied().collect();
        for feed_id in scheduled {
            if !feeds.contains_key(&feed_id) {
                self.sync_job(&mut jobs, feed_id, None, now);
            }
        }
        for (feed_id, feed) in &feeds {
            self.sync_job(&mut jobs, *feed_id, Some(feed), now);
        }

        tracing::debug!(jobs = jobs.len(), "Scheduler reloaded");
        Ok(())
    }

    /// Bring one feed's job in line with its stored settings.
    fn sync_job(
        self: &Arc<Self>,
        jobs: &mut HashMap<FeedId, ScheduledJob>,
        feed_id: FeedId,
        feed: Option<&FeedConfig>,
        now: DateTime<Utc>,
    ) {
        let Some(feed) = feed.filter(|f| f.is_auto_sync_eligible()) else {
            if let Some(job) = jobs.remove(&feed_id) {
                job.timer.abort();
                tracing::info!(%feed_id, "Feed unscheduled");
            }
            return;
        };

        let interval = feed.effective_interval();
        if jobs.get(&feed_id).is_some_and(|job| job.interval == interval) {
            return;
        }

        let next = next_run_at(feed.last_synced_at, interval, now);
        self.schedule(jobs, feed_id, interval, next, now);
    }

    /// Arm (or re-arm) the timer for a feed, cancelling any previous one.
    fn schedule(
        self: &Arc<Self>,
        jobs: &mut HashMap<FeedId, ScheduledJob>,
        feed_id: FeedId,
        interval: SyncInterval,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = (next_run_at - now).to_std().unwrap_or(Duration::ZERO);

        let inner = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so that aborting the timer never interrupts a run.
            tokio::spawn(async move { inner.run(feed_id, generation).await });
        });

        let job = ScheduledJob {
            interval,
            next_run_at,
            generation,
            timer: timer.abort_handle(),
        };
        if let Some(previous) = jobs.insert(feed_id, job) {
            previous.timer.abort();
        }

        tracing::info!(%feed_id, %interval, delay = ?delay, "Feed scheduled");
    }

    async fn run(self: Arc<Self>, feed_id: FeedId, generation: u64) {
        // Failures are recorded as sync runs by the reconciler.
        let _ = self
            .reconciler
            .reconcile(feed_id, TriggerKind::Automatic)
            .await;

        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get(&feed_id) else {
            return;
        };
        // Replaced while running (interval change, manual sync or restart).
        if job.generation != generation {
            return;
        }

        // A failed run still waits a full interval.
        let interval = job.interval;
        let now = self.clock.now();
        self.schedule(&mut jobs, feed_id, interval, now + interval.as_duration(), now);
    }
}
