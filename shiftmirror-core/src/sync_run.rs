//! Reconciliation log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MirrorError;
use crate::feed::FeedId;

pub type SyncRunId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Automatic,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Manual => write!(f, "manual"),
            TriggerKind::Automatic => write!(f, "automatic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

/// Counts returned by a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Occurrences inside the window, before day-splitting.
    pub total_occurrences: usize,
}

/// One row per reconciliation attempt. Only `read` changes after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub feed_id: FeedId,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl SyncRun {
    pub fn success(
        feed_id: FeedId,
        trigger: TriggerKind,
        summary: &SyncSummary,
        at: DateTime<Utc>,
    ) -> Self {
        SyncRun {
            id: Uuid::new_v4(),
            feed_id,
            trigger,
            status: RunStatus::Success,
            created: summary.created,
            updated: summary.updated,
            deleted: summary.deleted,
            error: None,
            error_kind: None,
            read: false,
            created_at: at,
        }
    }

    pub fn failure(
        feed_id: FeedId,
        trigger: TriggerKind,
        err: &MirrorError,
        at: DateTime<Utc>,
    ) -> Self {
        SyncRun {
            id: Uuid::new_v4(),
            feed_id,
            trigger,
            status: RunStatus::Error,
            created: 0,
            updated: 0,
            deleted: 0,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            read: false,
            created_at: at,
        }
    }
}

/// Filter for listing runs.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SyncRunFilter {
    pub feed_id: Option<FeedId>,
    #[serde(default)]
    pub unread: bool,
}

impl SyncRunFilter {
    pub fn matches(&self, run: &SyncRun) -> bool {
        self.feed_id.is_none_or(|id| id == run.feed_id) && (!self.unread || !run.read)
    }
}
