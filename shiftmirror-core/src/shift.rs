//! Shift entries on a local calendar.
//!
//! An entry is either created by a human or owned by a feed. Feed-owned entries carry
//! `external_feed_id`/`external_event_id` and are rewritten by every reconciliation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::feed::{CalendarId, FeedConfig, FeedId};
use crate::split::DaySlice;

pub type ShiftId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftEntry {
    pub id: ShiftId,
    pub calendar_id: CalendarId,
    pub date: NaiveDate,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub title: String,
    pub color: String,
    pub notes: Option<String>,
    pub all_day: bool,
    pub external_feed_id: Option<FeedId>,
    pub external_event_id: Option<String>,
    #[serde(default)]
    pub mirrored_from_external: bool,
}

impl ShiftEntry {
    pub fn is_mirrored_by(&self, feed_id: FeedId) -> bool {
        self.mirrored_from_external && self.external_feed_id == Some(feed_id)
    }
}

/// A freshly derived entry, keyed by its fingerprint. Becomes a [`ShiftEntry`] on insert, or
/// overwrites the fields of the existing entry with the same fingerprint on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredCandidate {
    pub external_event_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub title: String,
    pub color: String,
    pub notes: Option<String>,
    pub all_day: bool,
}

impl MirroredCandidate {
    pub fn from_slice(
        external_event_id: String,
        slice: &DaySlice,
        title: &str,
        notes: Option<&str>,
        color: &str,
        all_day: bool,
    ) -> Self {
        MirroredCandidate {
            external_event_id,
            date: slice.date,
            start_time: slice.start_time.clone(),
            end_time: slice.end_time.clone(),
            title: title.to_string(),
            color: color.to_string(),
            notes: notes.map(str::to_string),
            all_day,
        }
    }

    pub fn into_entry(self, feed: &FeedConfig) -> ShiftEntry {
        ShiftEntry {
            id: Uuid::new_v4(),
            calendar_id: feed.calendar_id,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            title: self.title,
            color: self.color,
            notes: self.notes,
            all_day: self.all_day,
            external_feed_id: Some(feed.id),
            external_event_id: Some(self.external_event_id),
            mirrored_from_external: true,
        }
    }

    /// Overwrite `entry` in place, keeping its id and ownership.
    pub fn overwrite(&self, entry: &mut ShiftEntry) {
        entry.date = self.date;
        entry.start_time = self.start_time.clone();
        entry.end_time = self.end_time.clone();
        entry.title = self.title.clone();
        entry.color = self.color.clone();
        entry.notes = self.notes.clone();
        entry.all_day = self.all_day;
    }
}

/// Input for a human-created entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NewShift {
    pub calendar_id: CalendarId,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub title: String,
    pub color: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub all_day: bool,
}

impl From<NewShift> for ShiftEntry {
    fn from(input: NewShift) -> Self {
        ShiftEntry {
            id: Uuid::new_v4(),
            calendar_id: input.calendar_id,
            date: input.date,
            start_time: input.start_time,
            end_time: input.end_time,
            title: input.title,
            color: input.color,
            notes: input.notes,
            all_day: input.all_day,
            external_feed_id: None,
            external_event_id: None,
            mirrored_from_external: false,
        }
    }
}
