/// Upper bound on a single journal frame; larger length prefixes are treated as damage.
pub const MAX_JOURNAL_FRAME_BYTES: usize = 1 << 20;

/// Coaches tracked by one engine (a single gym's roster).
pub const MAX_COACHES: usize = 10_000;

/// Bookings held per coach ledger.
pub const MAX_BOOKINGS_PER_COACH: usize = 100_000;

pub const MAX_NOTES_LEN: usize = 2_000;

/// Seed file limits.
pub const MAX_USER_NAME_LEN: usize = 255;
pub const MAX_PHONE_LEN: usize = 32;

/// Journal events queued for the group-commit writer.
pub const JOURNAL_CHANNEL_CAPACITY: usize = 4096;
