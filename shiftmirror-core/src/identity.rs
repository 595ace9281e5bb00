//! Fingerprints for mirrored entries.
//!
//! Upstream UIDs alone do not identify a day of a repeating or multi-day event, so the
//! reconciliation key is derived from the UID, the recurrence instance and the day index.

use std::fmt;

/// Identity of one occurrence before day-splitting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BaseId<'a> {
    Plain { uid: &'a str },
    Recurring { uid: &'a str, marker: &'a str },
}

impl<'a> BaseId<'a> {
    pub fn new(uid: &'a str, marker: Option<&'a str>) -> Self {
        match marker {
            Some(marker) => BaseId::Recurring { uid, marker },
            None => BaseId::Plain { uid },
        }
    }

    /// The `external_event_id` for one day of this occurrence. The day suffix is only added
    /// when the occurrence spans more than one day.
    pub fn for_day(&self, day_index: usize, day_count: usize) -> String {
        if day_count > 1 {
            format!("{self}_day{day_index}")
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for BaseId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseId::Plain { uid } => write!(f, "{uid}"),
            BaseId::Recurring { uid, marker } => write!(f, "{uid}_{marker}"),
        }
    }
}
