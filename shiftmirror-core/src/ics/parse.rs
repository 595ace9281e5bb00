//! Feed document parsing using the icalendar crate's parser.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};

use crate::error::{MirrorError, MirrorResult};
use crate::ics::EventTime;

/// One VEVENT from a feed, reduced to what mirroring needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub duration: Option<Duration>,
    pub rrule: Option<String>,
    pub exdates: Vec<EventTime>,
    pub recurrence_id: Option<EventTime>,
}

impl FeedEvent {
    pub fn is_all_day(&self) -> bool {
        self.start.as_ref().is_some_and(EventTime::is_date)
    }

    /// DTEND, else DTSTART + DURATION, else one day for all-day events.
    pub fn resolved_end(&self) -> Option<EventTime> {
        if let Some(end) = &self.end {
            return Some(end.clone());
        }
        let start = self.start.as_ref()?;
        match (self.duration, start) {
            (Some(duration), EventTime::Date(_)) => {
                Some(start.plus(Duration::days(duration.num_days().max(1))))
            }
            (Some(duration), _) => Some(start.plus(duration)),
            (None, EventTime::Date(_)) => Some(start.plus(Duration::days(1))),
            (None, _) => None,
        }
    }
}

/// Parse a whole feed document into its events.
///
/// Fails only when the document is not an iCalendar object at all. Individual events with
/// unusable properties are still returned; the expander decides what to skip.
pub fn parse_document(content: &str) -> MirrorResult<Vec<FeedEvent>> {
    let unfolded = unfold(content.trim_start_matches('\u{feff}'));

    if !unfolded
        .trim_start()
        .get(..15)
        .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(MirrorError::ParseError(
            "Document does not start with BEGIN:VCALENDAR".into(),
        ));
    }

    let calendar = read_calendar(&unfolded).map_err(|e| MirrorError::ParseError(e.to_string()))?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    Ok(vevents
        .into_iter()
        .enumerate()
        .map(|(index, vevent)| parse_vevent(vevent, index))
        .collect())
}

fn collect_vevents<'a, 'b>(components: &'b [Component<'a>], out: &mut Vec<&'b Component<'a>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else if component.name == "VCALENDAR" {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_vevent(vevent: &Component, index: usize) -> FeedEvent {
    let summary = text_prop(vevent, "SUMMARY");
    let start = vevent.find_prop("DTSTART").and_then(parse_time_prop);

    let uid = text_prop(vevent, "UID").unwrap_or_else(|| {
        // Without a UID, fall back to content so identical bytes keep yielding the same id.
        let when = start
            .as_ref()
            .map(EventTime::recurrence_marker)
            .unwrap_or_else(|| format!("n{index}"));
        format!("nouid-{when}-{}", summary.as_deref().unwrap_or_default())
    });

    let duration = vevent
        .find_prop("DURATION")
        .and_then(|p| parse_duration(p.val.as_ref()));

    let exdates = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_exdate_property)
        .collect();

    FeedEvent {
        uid,
        summary,
        description: text_prop(vevent, "DESCRIPTION"),
        start,
        end: vevent.find_prop("DTEND").and_then(parse_time_prop),
        duration,
        rrule: vevent
            .find_prop("RRULE")
            .map(|p| p.val.to_string())
            .filter(|r| !r.trim().is_empty()),
        exdates,
        recurrence_id: vevent.find_prop("RECURRENCE-ID").and_then(parse_time_prop),
    }
}

fn text_prop(component: &Component, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty())
}

fn parse_time_prop(prop: &Property) -> Option<EventTime> {
    match DatePerhapsTime::try_from(prop) {
        Ok(dpt) => Some(to_event_time(dpt)),
        Err(_) => {
            tracing::debug!(property = %prop.name, value = %prop.val, "Unparseable date value");
            None
        }
    }
}

/// Convert icalendar's DatePerhapsTime to our EventTime. Unknown TZIDs degrade to floating.
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            CalendarDateTime::WithTimezone { date_time, tzid } => zoned(date_time, &tzid),
        },
    }
}

fn zoned(datetime: NaiveDateTime, tzid: &str) -> EventTime {
    match resolve_tzid(tzid) {
        Some(tz) => EventTime::DateTimeZoned { datetime, tz },
        None => {
            tracing::debug!(tzid, "Unknown TZID, treating time as floating");
            EventTime::DateTimeFloating(datetime)
        }
    }
}

/// Outlook-style TZIDs are sometimes quoted or prefixed with a path (`/Europe/Berlin`).
fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let trimmed = tzid.trim_matches('"').trim_start_matches('/');
    trimmed.parse::<Tz>().ok()
}

/// Parse an EXDATE property into a list of EventTime values.
///
/// Handles `TZID=`, `VALUE=DATE`, UTC and floating values, and comma-separated lists.
fn parse_exdate_property(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date || s.len() == 8 {
                NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(EventTime::Date)
            } else if let Some(utc) = s.strip_suffix('Z') {
                NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                let naive = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S").ok()?;
                Some(match &tzid {
                    Some(tz) => zoned(naive, tz),
                    None => EventTime::DateTimeFloating(naive),
                })
            }
        })
        .collect()
}

fn parse_duration(value: &str) -> Option<Duration> {
    let negative = value.starts_with('-');
    let duration_str = value.trim_start_matches(['-', '+']);

    let duration = iso8601::duration(duration_str).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let duration = Duration::from_std(std_duration).ok()?;

    // A negative duration would put the end before the start.
    if negative { None } else { Some(duration) }
}

/// Undo RFC 5545 TEXT escaping.
pub(crate) fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn wrap(body: &str) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n{body}END:VCALENDAR\r\n"
        )
    }

    #[test]
    fn test_parse_basic_timed_event() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             UID:shift-1@example.com\r\n\
             SUMMARY:Early shift\r\n\
             DESCRIPTION:Bring keys\\, badge\\nand coffee\r\n\
             DTSTART:20240601T060000Z\r\n\
             DTEND:20240601T140000Z\r\n\
             END:VEVENT\r\n",
        );

        let events = parse_document(&doc).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.uid, "shift-1@example.com");
        assert_eq!(event.summary.as_deref(), Some("Early shift"));
        assert_eq!(
            event.description.as_deref(),
            Some("Bring keys, badge\nand coffee")
        );
        assert_eq!(
            event.start,
            Some(EventTime::DateTimeUtc(
                Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
            ))
        );
        assert!(!event.is_all_day());
        assert!(event.rrule.is_none());
    }

    #[test]
    fn test_parse_rejects_non_calendar_document() {
        let err = parse_document("<html><body>Not found</body></html>").unwrap_err();
        assert!(matches!(err, MirrorError::ParseError(_)));
    }

    #[test]
    fn test_parse_empty_calendar_is_valid() {
        let events = parse_document(&wrap("")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_all_day_without_dtend_lasts_one_day() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             UID:holiday\r\n\
             DTSTART;VALUE=DATE:20240601\r\n\
             END:VEVENT\r\n",
        );

        let event = &parse_document(&doc).unwrap()[0];
        assert!(event.is_all_day());
        assert_eq!(
            event.resolved_end(),
            Some(EventTime::Date(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()))
        );
    }

    #[test]
    fn test_duration_used_when_dtend_missing() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             UID:meeting\r\n\
             DTSTART:20240601T090000Z\r\n\
             DURATION:PT1H30M\r\n\
             END:VEVENT\r\n",
        );

        let event = &parse_document(&doc).unwrap()[0];
        assert_eq!(
            event.resolved_end(),
            Some(EventTime::DateTimeUtc(
                Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap()
            ))
        );
    }

    #[test]
    fn test_timed_event_without_end_has_no_end() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             UID:open\r\n\
             DTSTART:20240601T090000Z\r\n\
             END:VEVENT\r\n",
        );

        let event = &parse_document(&doc).unwrap()[0];
        assert!(event.resolved_end().is_none());
    }

    #[test]
    fn test_recurrence_properties() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             UID:weekly\r\n\
             DTSTART;TZID=Europe/Berlin:20240603T080000\r\n\
             DTEND;TZID=Europe/Berlin:20240603T160000\r\n\
             RRULE:FREQ=WEEKLY;BYDAY=MO\r\n\
             EXDATE;TZID=Europe/Berlin:20240610T080000,20240617T080000\r\n\
             END:VEVENT\r\n\
             BEGIN:VEVENT\r\n\
             UID:weekly\r\n\
             RECURRENCE-ID;TZID=Europe/Berlin:20240624T080000\r\n\
             DTSTART;TZID=Europe/Berlin:20240624T100000\r\n\
             DTEND;TZID=Europe/Berlin:20240624T180000\r\n\
             END:VEVENT\r\n",
        );

        let events = parse_document(&doc).unwrap();
        assert_eq!(events.len(), 2);

        let master = &events[0];
        assert_eq!(master.rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
        assert_eq!(master.exdates.len(), 2);
        assert!(matches!(
            master.start,
            Some(EventTime::DateTimeZoned { tz: chrono_tz::Europe::Berlin, .. })
        ));

        let moved = &events[1];
        assert_eq!(
            moved.recurrence_id.as_ref().map(EventTime::recurrence_marker),
            Some("20240624T060000Z".to_string())
        );
    }

    #[test]
    fn test_unknown_tzid_becomes_floating() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             UID:odd-zone\r\n\
             DTSTART;TZID=Custom Zone 7:20240601T090000\r\n\
             DTEND;TZID=Custom Zone 7:20240601T100000\r\n\
             END:VEVENT\r\n",
        );

        let event = &parse_document(&doc).unwrap()[0];
        assert!(matches!(event.start, Some(EventTime::DateTimeFloating(_))));
    }

    #[test]
    fn test_missing_uid_is_derived_from_content() {
        let doc = wrap(
            "BEGIN:VEVENT\r\n\
             SUMMARY:Standup\r\n\
             DTSTART:20240601T090000Z\r\n\
             DTEND:20240601T091500Z\r\n\
             END:VEVENT\r\n",
        );

        let first = parse_document(&doc).unwrap();
        let second = parse_document(&doc).unwrap();
        assert_eq!(first[0].uid, "nouid-20240601T090000Z-Standup");
        assert_eq!(first[0].uid, second[0].uid);
    }

    #[test]
    fn test_unescape_text() {
        assert_eq!(unescape_text(r"a\;b\,c\\d\Ne"), "a;b,c\\d\ne");
        assert_eq!(unescape_text("trailing\\"), "trailing\\");
    }
}
