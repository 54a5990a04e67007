// Hard caps enforced at the engine and venue boundaries.

pub const MAX_FIELDS_PER_VENUE: usize = 1_000;
pub const MAX_SLOTS_PER_BOOKING: usize = 24;
pub const MAX_BOOKINGS_PER_LEDGER: usize = 10_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_CONTACT_LEN: usize = 255;
pub const MAX_USER_ID_LEN: usize = 255;
pub const MAX_TOKEN_LEN: usize = 1_024;
pub const MAX_NOTIFICATION_LEN: usize = 64 * 1024;

pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_ANALYTICS_WINDOW_DAYS: i64 = 366;

pub const MAX_VENUES: usize = 1_024;
pub const MAX_VENUE_NAME_LEN: usize = 200;

/// Highest per-session price, in the smallest currency unit.
pub const MAX_PRICE: i64 = 1_000_000_000_000;

/// Longest session a field may define.
pub const MAX_SESSION_MINUTES: u32 = 24 * 60;
