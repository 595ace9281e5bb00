use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A DTSTART/DTEND/EXDATE/RECURRENCE-ID value as it appeared in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tz: Tz },
}

fn resolve_local<T: TimeZone>(tz: &T, naive: &NaiveDateTime) -> DateTime<Utc> {
    // Times inside a DST gap have no local mapping; read them as UTC.
    tz.from_local_datetime(naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

impl EventTime {
    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// The instant this value denotes. Dates and floating times are read in `display_tz`.
    pub fn instant(&self, display_tz: Tz) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => resolve_local(&display_tz, &d.and_time(NaiveTime::MIN)),
            EventTime::DateTimeUtc(dt) => *dt,
            EventTime::DateTimeFloating(naive) => resolve_local(&display_tz, naive),
            EventTime::DateTimeZoned { datetime, tz } => resolve_local(tz, datetime),
        }
    }

    /// Wall-clock reading used for day-splitting. UTC values are shown in `display_tz`;
    /// zoned values keep their own local time.
    pub fn wall_clock(&self, display_tz: Tz) -> NaiveDateTime {
        match self {
            EventTime::Date(d) => d.and_time(NaiveTime::MIN),
            EventTime::DateTimeUtc(dt) => dt.with_timezone(&display_tz).naive_local(),
            EventTime::DateTimeFloating(naive) => *naive,
            EventTime::DateTimeZoned { datetime, .. } => *datetime,
        }
    }

    /// Shift by `span`, keeping the variant. Dates move by whole days.
    pub fn plus(&self, span: Duration) -> EventTime {
        match self {
            EventTime::Date(d) => EventTime::Date(*d + Duration::days(span.num_days())),
            EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + span),
            EventTime::DateTimeFloating(naive) => EventTime::DateTimeFloating(*naive + span),
            EventTime::DateTimeZoned { datetime, tz } => EventTime::DateTimeZoned {
                datetime: *datetime + span,
                tz: *tz,
            },
        }
    }

    /// Stable key for one recurrence instance: `YYYYMMDD` for dates, the UTC instant as
    /// `YYYYMMDDTHHMMSSZ` otherwise. Floating times are formatted as-is.
    pub fn recurrence_marker(&self) -> String {
        match self {
            EventTime::Date(d) => d.format("%Y%m%d").to_string(),
            EventTime::DateTimeUtc(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            EventTime::DateTimeFloating(naive) => naive.format("%Y%m%dT%H%M%SZ").to_string(),
            EventTime::DateTimeZoned { datetime, tz } => resolve_local(tz, datetime)
                .format("%Y%m%dT%H%M%SZ")
                .to_string(),
        }
    }

    /// DTSTART/EXDATE line value for the rrule parser. All-day dates become midnight UTC and
    /// floating times are pinned to UTC, since the parser needs a concrete zone.
    pub fn to_rrule_param(&self, name: &str) -> String {
        match self {
            EventTime::Date(d) => format!("{name}:{}T000000Z", d.format("%Y%m%d")),
            EventTime::DateTimeUtc(dt) => format!("{name}:{}", dt.format("%Y%m%dT%H%M%SZ")),
            EventTime::DateTimeFloating(naive) => {
                format!("{name}:{}Z", naive.format("%Y%m%dT%H%M%S"))
            }
            EventTime::DateTimeZoned { datetime, tz } => format!(
                "{name};TZID={}:{}",
                tz.name(),
                datetime.format("%Y%m%dT%H%M%S")
            ),
        }
    }

    /// Convert an rrule instance back to the variant of the series' DTSTART.
    pub fn from_rrule_instance(dt: &DateTime<rrule::Tz>, template: &EventTime) -> EventTime {
        match template {
            EventTime::Date(_) => EventTime::Date(dt.date_naive()),
            EventTime::DateTimeUtc(_) => EventTime::DateTimeUtc(dt.with_timezone(&Utc)),
            EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(dt.naive_utc()),
            EventTime::DateTimeZoned { tz, .. } => EventTime::DateTimeZoned {
                datetime: dt.naive_local(),
                tz: *tz,
            },
        }
    }
}
