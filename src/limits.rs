// Hard limits that keep a single owner or request from growing state without bound.

pub const MAX_PURPOSE_LEN: usize = 2_000;
pub const MAX_NOTES_LEN: usize = 4_000;
pub const MAX_TIMEZONE_LABEL_LEN: usize = 50;
pub const MAX_LINK_LEN: usize = 2_048;
pub const MAX_EVENT_REF_LEN: usize = 255;

/// Windows per (owner, date), active or not.
pub const MAX_WINDOWS_PER_DAY: usize = 96;
/// Bookings per (owner, date), cancelled rows included.
pub const MAX_BOOKINGS_PER_DAY: usize = 1_024;

/// Widest date range a list query may cover, in days.
pub const MAX_LIST_RANGE_DAYS: i64 = 366;

/// How often an id lookup is retried when the entity moves between days
/// while we wait for its lock.
pub const MAX_LOCATE_ATTEMPTS: usize = 8;

pub const WAL_CHANNEL_CAPACITY: usize = 4_096;
