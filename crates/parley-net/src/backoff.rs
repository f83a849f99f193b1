//! Reconnect delay schedule.

use std::time::Duration;

use parley_shared::constants::{BACKOFF_BASE_MS, BACKOFF_CAP_MS};

/// Delay before the reconnect attempt that follows `retry_count` consecutive
/// failures: `min(1000 * 2^retry_count, 10000)` milliseconds. No jitter.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let millis = BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_CAP_MS);
    Duration::from_millis(millis)
}
