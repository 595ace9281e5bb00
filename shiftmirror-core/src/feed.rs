//! External calendar subscriptions.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::ALLOWED_SYNC_INTERVALS;
use crate::error::{MirrorError, MirrorResult};

pub type FeedId = Uuid;
pub type CalendarId = Uuid;

/// Where a feed comes from. Only `Custom` feeds go through the private-address guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Icloud,
    Google,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Normal,
    Minimal,
}

/// Auto-sync interval in minutes, restricted to [`ALLOWED_SYNC_INTERVALS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SyncInterval(u32);

impl SyncInterval {
    pub const MANUAL: SyncInterval = SyncInterval(0);

    pub fn from_minutes(minutes: u32) -> MirrorResult<Self> {
        if ALLOWED_SYNC_INTERVALS.contains(&minutes) {
            Ok(SyncInterval(minutes))
        } else {
            Err(MirrorError::Validation(format!(
                "Unsupported auto-sync interval {minutes}; expected one of {ALLOWED_SYNC_INTERVALS:?}"
            )))
        }
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn is_manual(&self) -> bool {
        self.0 == 0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }
}

impl TryFrom<u32> for SyncInterval {
    type Error = MirrorError;

    fn try_from(minutes: u32) -> MirrorResult<Self> {
        SyncInterval::from_minutes(minutes)
    }
}

impl From<SyncInterval> for u32 {
    fn from(interval: SyncInterval) -> u32 {
        interval.0
    }
}

impl fmt::Display for SyncInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_manual() {
            write!(f, "manual")
        } else {
            write!(f, "every {}m", self.0)
        }
    }
}

/// One user-created subscription to an external calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: FeedId,
    pub calendar_id: CalendarId,
    /// Absent for one-time file imports.
    pub source_url: Option<String>,
    pub source_kind: SourceKind,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub auto_sync_interval: SyncInterval,
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_one_time_import: bool,
    pub created_at: DateTime<Utc>,
}

impl FeedConfig {
    pub fn new(calendar_id: CalendarId, input: NewFeed, now: DateTime<Utc>) -> Self {
        FeedConfig {
            id: Uuid::new_v4(),
            calendar_id,
            source_url: Some(input.source_url),
            source_kind: input.source_kind,
            name: input.name,
            color: input.color,
            display_mode: input.display_mode,
            auto_sync_interval: input.auto_sync_interval,
            last_synced_at: None,
            is_one_time_import: false,
            created_at: now,
        }
    }

    pub fn one_time_import(
        calendar_id: CalendarId,
        name: String,
        color: String,
        now: DateTime<Utc>,
    ) -> Self {
        FeedConfig {
            id: Uuid::new_v4(),
            calendar_id,
            source_url: None,
            source_kind: SourceKind::Custom,
            name,
            color,
            display_mode: DisplayMode::default(),
            auto_sync_interval: SyncInterval::MANUAL,
            last_synced_at: None,
            is_one_time_import: true,
            created_at: now,
        }
    }

    /// The interval the scheduler should honor. One-time imports are never auto-synced.
    pub fn effective_interval(&self) -> SyncInterval {
        if self.is_one_time_import || self.source_url.is_none() {
            SyncInterval::MANUAL
        } else {
            self.auto_sync_interval
        }
    }

    pub fn is_auto_sync_eligible(&self) -> bool {
        !self.effective_interval().is_manual()
    }

    /// Apply a partial update. One-time imports only accept display changes.
    pub fn apply_patch(&mut self, patch: FeedPatch) -> MirrorResult<()> {
        if self.is_one_time_import && patch.auto_sync_interval.is_some() {
            return Err(MirrorError::Validation(
                "One-time imports cannot be auto-synced".into(),
            ));
        }

        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(display_mode) = patch.display_mode {
            self.display_mode = display_mode;
        }
        if let Some(interval) = patch.auto_sync_interval {
            self.auto_sync_interval = interval;
        }

        Ok(())
    }
}

impl fmt::Display for FeedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Input for subscribing to a URL feed.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFeed {
    pub source_url: String,
    pub source_kind: SourceKind,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub auto_sync_interval: SyncInterval,
}

/// Input for a one-time import of an uploaded document.
#[derive(Debug, Clone, Deserialize)]
pub struct NewImport {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub display_mode: DisplayMode,
    /// Raw iCalendar text.
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub display_mode: Option<DisplayMode>,
    pub auto_sync_interval: Option<SyncInterval>,
}
