use crate::model::{Minute, Ms};

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Candidate start times are generated on this grid regardless of lesson length.
pub const SLOT_STEP_MINUTES: Minute = 30;

/// Same-day candidates must start strictly more than this many minutes after now.
pub const SAME_DAY_LEAD_MINUTES: Minute = 60;

/// Unpaid `reservation-pending` bookings older than this are expired by the sweep.
pub const PENDING_EXPIRY_MS: Ms = 24 * 3_600_000;

/// Lifetime of a checkout hold.
pub const HOLD_TTL_MS: Ms = 15 * 60_000;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5 * 60;

/// Webhook timestamps older than this are rejected as replays.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

pub const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ATHLETES_PER_BOOKING: usize = 8;
pub const MAX_REASON_LEN: usize = 512;

/// Processed webhook correlation pairs are forgotten after this long, or
/// sooner once more than `MAX_PROCESSED_PAIRS` are held.
pub const PROCESSED_RETENTION_MS: Ms = 7 * 24 * 3_600_000;
pub const MAX_PROCESSED_PAIRS: usize = 10_000;
