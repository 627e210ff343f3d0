//! Exposure-notification interval arithmetic.
//!
//! Key validity is expressed in 10-minute intervals since the Unix epoch
//! ("EN interval numbers"). A key with `rollingStartNumber = n` became active
//! at `n * 600` seconds after the epoch.

use chrono::{DateTime, Utc};

/// Length of one EN interval in seconds.
pub const INTERVAL_SECONDS: i64 = 600;

/// Decoded size of a temporary exposure key in bytes.
pub const KEY_LENGTH: usize = 16;

/// Number of days a diagnosis key stays relevant.
pub const RETENTION_DAYS: i64 = 14;

/// Largest valid rolling period (24 hours of intervals).
pub const MAX_ROLLING_PERIOD: i32 = 144;

/// Largest valid transmission risk level.
pub const MAX_TRANSMISSION_RISK_LEVEL: i32 = 8;

/// Returns the EN interval number containing `ts`.
pub fn interval_number(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(INTERVAL_SECONDS)
}
