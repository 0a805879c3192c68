use std::time::{SystemTime, UNIX_EPOCH};

/// Fits a u64 into an i64 sqlite column, by mapping the range
/// [0, i64::MAX] to itself, and mapping [i64::MAX + 1, u64::MAX - 1] into
/// the negative range of i64.
/// NOTE: this fails for u64::MAX
pub(crate) fn u64_into_i64(n: u64) -> i64 {
    if n > i64::MAX as u64 {
        -((n - i64::MAX as u64) as i64)
    } else {
        n as i64
    }
}

/// Extracts a u64 that was fitted into an i64 by `u64_into_i64`.
pub(crate) fn i64_into_u64(n: i64) -> u64 {
    if n < 0 {
        n.unsigned_abs() + i64::MAX as u64
    } else {
        n as u64
    }
}

/// Gets the current timestamp in milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
