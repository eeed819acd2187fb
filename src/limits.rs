/// Maximum resources in the catalog.
pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_ATTRIBUTES: usize = 64;
pub const MAX_ATTRIBUTE_LEN: usize = 1_024;

pub const MAX_BLACKOUT_REASON_LEN: usize = 500;
pub const DEFAULT_BLACKOUT_REASON: &str = "Resource unavailable";

/// Widest range accepted by a single capacity initialization or availability query.
pub const MAX_DATE_RANGE_DAYS: i64 = 365;

/// Distinct dates a single CreateHold may span.
pub const MAX_DATES_PER_HOLD: usize = 31;
pub const MAX_TOKEN_LEN: usize = 128;
pub const MAX_CUSTOMER_LEN: usize = 255;
pub const MAX_ORDER_REF_LEN: usize = 128;

pub const DEFAULT_EXTENSION_MINUTES: i64 = 30;
pub const MAX_EXTENSION_MINUTES: i64 = 24 * 60;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Sweep batches above this size point at a stalled checkout flow.
pub const SWEEP_LARGE_BATCH: usize = 100;
pub const SWEEP_SLOW_MS: u128 = 5_000;

/// More overdue holds than this means the sweeper is not keeping up.
pub const HEALTH_OVERDUE_CRITICAL: usize = 50;

/// Upper bound on a single WAL payload; larger length prefixes are treated as corruption.
pub const MAX_WAL_RECORD_LEN: usize = 1 << 20;
