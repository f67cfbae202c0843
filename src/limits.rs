//! Hard caps on request shapes. These are abuse guards, not business policy;
//! policy knobs (hold TTL, sweep cadence) are injected configuration.

/// Longest stay a single hold may cover, in nights.
pub const MAX_STAY_NIGHTS: i64 = 30;

/// Widest day range a single provisioning call may cover.
pub const MAX_PROVISION_DAYS: i64 = 366;

/// Widest day range an availability query may cover.
pub const MAX_QUERY_DAYS: i64 = 366;

/// Per-row capacity ceiling.
pub const MAX_TOTAL_QTY: u32 = 10_000;

pub const MAX_ROOM_TYPE_LEN: usize = 64;

pub const MAX_CONTACT_FIELD_LEN: usize = 128;
