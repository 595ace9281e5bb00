//! Mirror external iCalendar feeds into a local shift calendar.
//!
//! The pipeline for one feed is fetch → parse → expand → split → fingerprint → diff →
//! atomic commit. [`reconcile::Reconciler`] runs it once; [`scheduler::Scheduler`] runs it
//! on each feed's auto-sync interval.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod expand;
pub mod feed;
pub mod fetch;
pub mod ics;
pub mod identity;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod shift;
pub mod split;
pub mod store;
pub mod sync_run;

pub use error::{MirrorError, MirrorResult};
