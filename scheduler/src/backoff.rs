//! Exponential retry backoff.

use chrono::Duration;

use corebank_common::constants::{retry_backoff_base, retry_backoff_max};

/// Delay before the attempt following `retry_count` failures: the base
/// delay doubled per prior failure, capped at the configured ceiling.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let base = retry_backoff_base();
    let max = retry_backoff_max();

    let exponent = retry_count.saturating_sub(1).min(30);
    let factor = 1i32 << exponent;
    base.checked_mul(factor).unwrap_or(max).min(max)
}
