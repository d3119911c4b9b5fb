use crate::model::Ms;

/// Licence plates are stored as-is; the registry column is 20 chars wide.
pub const MAX_PLATE_LEN: usize = 20;

/// Upper bound on slots in the lot, across all `INSERT INTO slots` calls.
pub const MAX_SLOTS: u32 = 100_000;

/// Upper bound on vehicles waiting in the queue.
pub const MAX_QUEUE_LEN: usize = 100_000;

/// Longest accepted command line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 4096;

/// Requested arrival times must fall inside this window.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999; // 9999-12-31T23:59:59.999Z
