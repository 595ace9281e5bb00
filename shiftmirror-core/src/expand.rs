//! Recurrence expansion of feed events into concrete occurrences inside the sync window.
//!
//! Non-recurring events yield at most one occurrence. Recurring events are expanded with the
//! rrule crate, honoring EXDATEs and RECURRENCE-ID overrides. Overrides are emitted as their own
//! occurrence carrying the marker of the instance they replace.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::error::{MirrorError, MirrorResult};
use crate::ics::{EventTime, FeedEvent};

/// Half-open window `[start, end)` of instants that get mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn around(now: DateTime<Utc>, past_months: u32, future_months: u32) -> Self {
        SyncWindow {
            start: now
                .checked_sub_months(Months::new(past_months))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now
                .checked_add_months(Months::new(future_months))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && (end > self.start || start >= self.start)
    }
}

/// One concrete occurrence, as wall-clock times ready for day-splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence<'a> {
    pub event: &'a FeedEvent,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub all_day: bool,
    /// Set for instances of a recurring series, including overrides.
    pub recurrence_marker: Option<String>,
}

/// Expand every event of a document, in document order.
pub fn expand_document<'a>(
    events: &'a [FeedEvent],
    window: &SyncWindow,
    display_tz: Tz,
) -> MirrorResult<Vec<Occurrence<'a>>> {
    let mut overridden: HashMap<&str, HashSet<String>> = HashMap::new();
    for event in events {
        if let Some(recurrence_id) = &event.recurrence_id {
            overridden
                .entry(event.uid.as_str())
                .or_default()
                .insert(recurrence_id.recurrence_marker());
        }
    }

    let no_overrides = HashSet::new();
    let mut occurrences = Vec::new();

    for event in events {
        let overrides = overridden.get(event.uid.as_str()).unwrap_or(&no_overrides);
        occurrences.extend(expand_event(event, window, display_tz, overrides)?);
    }

    Ok(occurrences)
}

/// Expand a single event. `overridden` holds markers of instances replaced by a separate
/// RECURRENCE-ID component and is only consulted for recurring events.
pub fn expand_event<'a>(
    event: &'a FeedEvent,
    window: &SyncWindow,
    display_tz: Tz,
    overridden: &HashSet<String>,
) -> MirrorResult<Vec<Occurrence<'a>>> {
    let Some(start) = &event.start else {
        tracing::debug!(uid = %event.uid, "Skipping event without DTSTART");
        return Ok(Vec::new());
    };
    let Some(end) = event.resolved_end() else {
        tracing::debug!(uid = %event.uid, "Skipping timed event without DTEND or DURATION");
        return Ok(Vec::new());
    };

    if let Some(recurrence_id) = &event.recurrence_id {
        let marker = recurrence_id.recurrence_marker();
        return Ok(single(event, start, &end, window, display_tz, Some(marker))
            .into_iter()
            .collect());
    }

    match &event.rrule {
        Some(rrule) => expand_series(event, rrule, start, &end, window, display_tz, overridden),
        None => Ok(single(event, start, &end, window, display_tz, None)
            .into_iter()
            .collect()),
    }
}

fn single<'a>(
    event: &'a FeedEvent,
    start: &EventTime,
    end: &EventTime,
    window: &SyncWindow,
    display_tz: Tz,
    recurrence_marker: Option<String>,
) -> Option<Occurrence<'a>> {
    if !window.overlaps(start.instant(display_tz), end.instant(display_tz)) {
        return None;
    }

    Some(Occurrence {
        event,
        start: start.wall_clock(display_tz),
        end: end.wall_clock(display_tz),
        all_day: start.is_date(),
        recurrence_marker,
    })
}

fn expand_series<'a>(
    event: &'a FeedEvent,
    rrule: &str,
    start: &EventTime,
    end: &EventTime,
    window: &SyncWindow,
    display_tz: Tz,
    overridden: &HashSet<String>,
) -> MirrorResult<Vec<Occurrence<'a>>> {
    let rrule_set = build_rrule_set(&event.uid, start, rrule)?;
    let span = span_between(start, end, display_tz);

    let excluded: HashSet<String> = event
        .exdates
        .iter()
        .map(EventTime::recurrence_marker)
        .collect();
    // Some producers send date-only EXDATEs for timed series.
    let excluded_days: HashSet<NaiveDate> = if start.is_date() {
        HashSet::new()
    } else {
        event
            .exdates
            .iter()
            .filter_map(|exdate| match exdate {
                EventTime::Date(d) => Some(*d),
                _ => None,
            })
            .collect()
    };

    let mut occurrences = Vec::new();

    for instance in &rrule_set {
        let instance_start = EventTime::from_rrule_instance(&instance, start);
        let instant = instance_start.instant(display_tz);

        if instant >= window.end {
            break;
        }
        if instant < window.start {
            continue;
        }

        let marker = instance_start.recurrence_marker();
        let wall_start = instance_start.wall_clock(display_tz);

        if excluded.contains(&marker)
            || excluded_days.contains(&wall_start.date())
            || overridden.contains(&marker)
        {
            continue;
        }

        occurrences.push(Occurrence {
            event,
            start: wall_start,
            end: instance_start.plus(span).wall_clock(display_tz),
            all_day: start.is_date(),
            recurrence_marker: Some(marker),
        });
    }

    Ok(occurrences)
}

/// Fixed length of each instance, measured in the template's own terms.
fn span_between(start: &EventTime, end: &EventTime, display_tz: Tz) -> Duration {
    match (start, end) {
        (EventTime::Date(s), EventTime::Date(e)) => Duration::days((*e - *s).num_days()),
        (EventTime::DateTimeFloating(s), EventTime::DateTimeFloating(e)) => *e - *s,
        (
            EventTime::DateTimeZoned { datetime: s, tz: a },
            EventTime::DateTimeZoned { datetime: e, tz: b },
        ) if a == b => *e - *s,
        _ => end.instant(display_tz) - start.instant(display_tz),
    }
}

fn build_rrule_set(uid: &str, start: &EventTime, rrule: &str) -> MirrorResult<RRuleSet> {
    let rrule_str = format!(
        "{}\nRRULE:{}",
        start.to_rrule_param("DTSTART"),
        normalize_until(rrule)
    );

    rrule_str.parse().map_err(|e| {
        MirrorError::ParseError(format!("Failed to parse RRULE for event '{uid}': {e}"))
    })
}

/// The rrule parser needs UNTIL as a UTC date-time, while feeds often send a bare date or a
/// floating time.
fn normalize_until(rrule: &str) -> String {
    rrule
        .trim()
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                if value.len() == 8 {
                    format!("UNTIL={value}T235959Z")
                } else if !value.ends_with('Z') {
                    format!("UNTIL={value}Z")
                } else {
                    part.to_string()
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}
