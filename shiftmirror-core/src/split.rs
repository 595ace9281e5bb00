//! Multi-day splitting of a single occurrence into per-day slices.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::constants::{ALL_DAY_END, ALL_DAY_START};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlice {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub day_index: usize,
}

fn clock(dt: &NaiveDateTime) -> String {
    dt.format("%H:%M").to_string()
}

/// Split `[start, end)` into one slice per calendar day it touches.
///
/// All-day ends are exclusive, so the last real day is `end - 1 day`. An end before the start
/// collapses to a single slice on the start day.
pub fn split_days(start: NaiveDateTime, end: NaiveDateTime, all_day: bool) -> Vec<DaySlice> {
    let end = if all_day { end - Duration::days(1) } else { end };

    let start_day = start.date();
    let days_diff = (end.date() - start_day).num_days();

    if days_diff <= 0 {
        let (start_time, end_time) = if all_day {
            (ALL_DAY_START.to_string(), ALL_DAY_END.to_string())
        } else {
            (clock(&start), clock(&end))
        };
        return vec![DaySlice {
            date: start_day,
            start_time,
            end_time,
            day_index: 0,
        }];
    }

    (0..=days_diff)
        .map(|offset| {
            let start_time = if offset == 0 && !all_day {
                clock(&start)
            } else {
                ALL_DAY_START.to_string()
            };
            let end_time = if offset == days_diff && !all_day {
                clock(&end)
            } else {
                ALL_DAY_END.to_string()
            };

            DaySlice {
                date: start_day + Duration::days(offset),
                start_time,
                end_time,
                day_index: offset as usize,
            }
        })
        .collect()
}
