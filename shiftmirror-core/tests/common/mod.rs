#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use url::Url;
use uuid::Uuid;

use shiftmirror_core::clock::TokioClock;
use shiftmirror_core::feed::{FeedConfig, NewFeed, SourceKind, SyncInterval};
use shiftmirror_core::fetch::FeedFetcher;
use shiftmirror_core::notify::BroadcastNotifier;
use shiftmirror_core::reconcile::{ReconcileSettings, Reconciler};
use shiftmirror_core::store::{JsonStore, MirrorStore};
use shiftmirror_core::{MirrorError, MirrorResult};

#[derive(Clone)]
pub enum Reply {
    Body(String),
    Fail,
    Hang,
    Slow(Duration, String),
}

/// Serves canned replies per URL and counts requests.
#[derive(Default)]
pub struct FakeFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn set(&self, url: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn serve(&self, url: &str, body: impl Into<String>) {
        self.set(url, Reply::Body(body.into()));
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> MirrorResult<String> {
        let key = url.to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or(Reply::Fail);

        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Fail => Err(MirrorError::FetchFailed("HTTP 503 Service Unavailable".into())),
            Reply::Hang => std::future::pending().await,
            Reply::Slow(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        }
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn feed_url(name: &str) -> String {
    format!("https://p01-calendars.icloud.com/published/{name}.ics")
}

pub struct Harness {
    pub store: Arc<JsonStore>,
    pub fetcher: Arc<FakeFetcher>,
    pub notifier: Arc<BroadcastNotifier>,
    pub clock: Arc<TokioClock>,
    pub reconciler: Arc<Reconciler>,
    pub calendar_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReconcileSettings::default())
    }

    pub fn with_settings(settings: ReconcileSettings) -> Self {
        let store = Arc::new(JsonStore::in_memory());
        let fetcher = Arc::new(FakeFetcher::default());
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let clock = Arc::new(TokioClock::starting_at(base_time()));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
            clock.clone(),
            settings,
        ));

        Harness {
            store,
            fetcher,
            notifier,
            clock,
            reconciler,
            calendar_id: Uuid::new_v4(),
        }
    }

    /// Store a URL feed directly, bypassing create_feed.
    pub async fn add_feed(
        &self,
        name: &str,
        interval_minutes: u32,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> FeedConfig {
        let mut feed = FeedConfig::new(
            self.calendar_id,
            NewFeed {
                source_url: feed_url(name),
                source_kind: SourceKind::Icloud,
                name: name.to_string(),
                color: "#4a90d9".into(),
                display_mode: Default::default(),
                auto_sync_interval: SyncInterval::from_minutes(interval_minutes).unwrap(),
            },
            base_time(),
        );
        feed.last_synced_at = last_synced_at;
        self.store.insert_feed(feed.clone()).await.unwrap();
        feed
    }

    pub async fn external_ids(&self, feed: &FeedConfig) -> Vec<String> {
        self.store
            .list_mirrored(feed.id)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| e.external_event_id)
            .collect()
    }
}

pub fn calendar(events: &[String]) -> String {
    let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//shiftmirror tests//EN\r\n");
    for event in events {
        out.push_str(event);
    }
    out.push_str("END:VCALENDAR\r\n");
    out
}

/// A VEVENT from raw property lines (`DTSTART:...` etc.).
pub fn vevent(uid: &str, lines: &[&str]) -> String {
    let mut out = format!("BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTAMP:20240101T000000Z\r\n");
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str("END:VEVENT\r\n");
    out
}

pub fn timed(uid: &str, summary: &str, start: &str, end: &str) -> String {
    vevent(
        uid,
        &[
            &format!("SUMMARY:{summary}"),
            &format!("DTSTART:{start}"),
            &format!("DTEND:{end}"),
        ],
    )
}
