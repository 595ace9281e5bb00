//! Three-way diff between freshly derived candidates and what is already mirrored.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::FeedConfig;
use crate::shift::{MirroredCandidate, ShiftEntry};
use crate::store::ChangeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::Create => write!(f, "+"),
            DiffKind::Update => write!(f, "~"),
            DiffKind::Delete => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryDiff {
    pub kind: DiffKind,
    pub old: Option<ShiftEntry>,
    pub new: Option<MirroredCandidate>,
}

impl EntryDiff {
    fn external_id(&self) -> &str {
        self.new
            .as_ref()
            .map(|c| c.external_event_id.as_str())
            .or_else(|| self.old.as_ref().and_then(|e| e.external_event_id.as_deref()))
            .unwrap_or_default()
    }
}

impl fmt::Display for EntryDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.external_id())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub diffs: Vec<EntryDiff>,
}

impl ReconcilePlan {
    /// Match candidates to existing entries by fingerprint.
    ///
    /// Every match is an update, even when nothing changed. Existing entries that no
    /// candidate claims are deleted. If the document produced the same fingerprint twice,
    /// the first candidate wins.
    pub fn compute(candidates: Vec<MirroredCandidate>, existing: Vec<ShiftEntry>) -> Self {
        let mut diffs = Vec::new();

        let mut existing_by_id: HashMap<String, ShiftEntry> = HashMap::new();
        for entry in existing {
            let Some(key) = entry.external_event_id.clone() else {
                continue;
            };
            if existing_by_id.contains_key(&key) {
                diffs.push(EntryDiff {
                    kind: DiffKind::Delete,
                    old: Some(entry),
                    new: None,
                });
            } else {
                existing_by_id.insert(key, entry);
            }
        }

        let mut claimed = HashSet::new();
        for candidate in candidates {
            if !claimed.insert(candidate.external_event_id.clone()) {
                tracing::warn!(
                    external_event_id = %candidate.external_event_id,
                    "Duplicate fingerprint in feed, keeping the first"
                );
                continue;
            }

            match existing_by_id.remove(&candidate.external_event_id) {
                Some(old) => diffs.push(EntryDiff {
                    kind: DiffKind::Update,
                    old: Some(old),
                    new: Some(candidate),
                }),
                None => diffs.push(EntryDiff {
                    kind: DiffKind::Create,
                    old: None,
                    new: Some(candidate),
                }),
            }
        }

        let mut stale: Vec<ShiftEntry> = existing_by_id.into_values().collect();
        stale.sort_by(|a, b| a.external_event_id.cmp(&b.external_event_id));
        diffs.extend(stale.into_iter().map(|old| EntryDiff {
            kind: DiffKind::Delete,
            old: Some(old),
            new: None,
        }));

        ReconcilePlan { diffs }
    }

    /// (created, updated, deleted)
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut created = 0;
        let mut updated = 0;
        let mut deleted = 0;

        for diff in &self.diffs {
            match diff.kind {
                DiffKind::Create => created += 1,
                DiffKind::Update => updated += 1,
                DiffKind::Delete => deleted += 1,
            }
        }

        (created, updated, deleted)
    }

    pub fn into_change_set(self, feed: &FeedConfig, synced_at: DateTime<Utc>) -> ChangeSet {
        let mut changes = ChangeSet {
            feed_id: feed.id,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            last_synced_at: synced_at,
        };

        for diff in self.diffs {
            match (diff.kind, diff.old, diff.new) {
                (DiffKind::Create, _, Some(new)) => changes.inserts.push(new.into_entry(feed)),
                (DiffKind::Update, Some(mut old), Some(new)) => {
                    new.overwrite(&mut old);
                    changes.updates.push(old);
                }
                (DiffKind::Delete, Some(old), _) => changes.deletes.push(old.id),
                (kind, _, _) => tracing::debug!(%kind, "Ignoring malformed diff"),
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{NewFeed, SourceKind, SyncInterval};
    use crate::split::DaySlice;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn feed() -> FeedConfig {
        FeedConfig::new(
            Uuid::new_v4(),
            NewFeed {
                source_url: "https://example.com/cal.ics".into(),
                source_kind: SourceKind::Custom,
                name: "Work".into(),
                color: "#336699".into(),
                display_mode: Default::default(),
                auto_sync_interval: SyncInterval::MANUAL,
            },
            Utc::now(),
        )
    }

    fn candidate(id: &str, title: &str) -> MirroredCandidate {
        let slice = DaySlice {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            start_time: "09:00".into(),
            end_time: "17:00".into(),
            day_index: 0,
        };
        MirroredCandidate::from_slice(id.into(), &slice, title, None, "#336699", false)
    }

    #[test]
    fn test_first_sync_creates_everything() {
        let plan = ReconcilePlan::compute(vec![candidate("a", "A"), candidate("b", "B")], vec![]);
        assert_eq!(plan.counts(), (2, 0, 0));
    }

    #[test]
    fn test_matches_update_and_missing_delete() {
        let feed = feed();
        let existing: Vec<ShiftEntry> = ["a", "b", "c"]
            .iter()
            .map(|id| candidate(id, "old").into_entry(&feed))
            .collect();
        let kept_id = existing[0].id;

        let plan = ReconcilePlan::compute(
            vec![candidate("a", "new"), candidate("d", "D")],
            existing,
        );
        assert_eq!(plan.counts(), (1, 1, 2));

        let changes = plan.into_change_set(&feed, Utc::now());
        assert_eq!(changes.updates.len(), 1);
        assert_eq!(changes.updates[0].id, kept_id);
        assert_eq!(changes.updates[0].title, "new");
        assert_eq!(changes.inserts[0].external_event_id.as_deref(), Some("d"));
        assert!(changes.inserts[0].mirrored_from_external);
        assert_eq!(changes.inserts[0].external_feed_id, Some(feed.id));
        assert_eq!(changes.deletes.len(), 2);
    }

    #[test]
    fn test_unchanged_rows_are_still_updated() {
        let feed = feed();
        let existing = vec![candidate("a", "A").into_entry(&feed)];
        let plan = ReconcilePlan::compute(vec![candidate("a", "A")], existing);
        assert_eq!(plan.counts(), (0, 1, 0));
    }

    #[test]
    fn test_empty_document_deletes_all() {
        let feed = feed();
        let existing = vec![
            candidate("a", "A").into_entry(&feed),
            candidate("b", "B").into_entry(&feed),
        ];
        let plan = ReconcilePlan::compute(vec![], existing);
        assert_eq!(plan.counts(), (0, 0, 2));
    }

    #[test]
    fn test_duplicate_fingerprint_keeps_first() {
        let plan = ReconcilePlan::compute(
            vec![candidate("a", "first"), candidate("a", "second")],
            vec![],
        );
        assert_eq!(plan.counts(), (1, 0, 0));
        assert_eq!(plan.diffs[0].new.as_ref().unwrap().title, "first");
        assert_eq!(plan.diffs[0].to_string(), "+: a");
    }
}
