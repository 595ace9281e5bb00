//! Feed document parsing.
//!
//! Reads the VEVENTs of an iCalendar feed (RFC 5545) into [`FeedEvent`] values.

mod event_time;
mod parse;

pub use event_time::EventTime;
pub use parse::{FeedEvent, parse_document};
