//! Hard caps on every client-controlled quantity. A request that would
//! exceed one of these fails with `LimitExceeded` instead of growing
//! server state without bound.

/// Max resources per site.
pub const MAX_RESOURCES_PER_SITE: usize = 10_000;

/// Max bookings held on one resource (all statuses, cancelled included).
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

/// Max opening-hour windows on one resource.
pub const MAX_WINDOWS_PER_RESOURCE: usize = 64;

/// Max instances a single recurrence rule may expand to.
pub const MAX_SERIES_INSTANCES: usize = 500;

/// Max recurrence interval (days, weeks or months depending on frequency).
pub const MAX_RECURRENCE_INTERVAL: u32 = 52;

/// Max length of resource / member display names.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a booking purpose text.
pub const MAX_PURPOSE_LEN: usize = 1024;

/// Max sites loaded at once.
pub const MAX_SITES: usize = 256;

/// Max site (database) name length.
pub const MAX_SITE_NAME_LEN: usize = 256;

/// Audit ring buffer length per site; oldest entries are dropped.
pub const MAX_AUDIT_ENTRIES: usize = 10_000;

/// Max live undo windows per connection.
pub const MAX_UNDO_WINDOWS: usize = 64;

/// Default undo window duration.
pub const UNDO_WINDOW_MS: u64 = 10_000;

/// Earliest calendar year accepted in any date input.
pub const MIN_VALID_YEAR: i32 = 2000;

/// Latest calendar year accepted in any date input.
pub const MAX_VALID_YEAR: i32 = 2200;
