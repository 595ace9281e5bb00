use std::time::Duration;

/// Auto-sync intervals a feed may be configured with, in minutes. `0` means manual only.
pub const ALLOWED_SYNC_INTERVALS: [u32; 9] = [0, 5, 15, 30, 60, 120, 360, 720, 1440];

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the scheduler re-reads feed configuration.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_WINDOW_PAST_MONTHS: u32 = 3;
pub const DEFAULT_WINDOW_FUTURE_MONTHS: u32 = 12;

pub const DEFAULT_FALLBACK_TITLE: &str = "(No title)";

pub const ALL_DAY_START: &str = "00:00";
pub const ALL_DAY_END: &str = "23:59";

/// Sync runs kept per feed; older rows are pruned on append.
pub const SYNC_RUN_RETENTION: usize = 200;
