//! UTC day arithmetic for rate limits and expiry dates

use crate::clock::DAY_MS;

/// Start of the UTC day containing `timestamp_ms`, in milliseconds.
///
/// # Example
/// ```
/// use loyalty_engine::time_bucket::day_start_ms;
/// // 2023-12-28 12:34:56 UTC
/// assert_eq!(day_start_ms(1703766896000), 1703721600000);
/// ```
pub fn day_start_ms(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(DAY_MS)
}

/// Timestamp `days` after `timestamp_ms`
pub fn add_days(timestamp_ms: i64, days: u32) -> i64 {
    timestamp_ms.saturating_add(i64::from(days) * DAY_MS)
}
