//! Conversions between timestamps and Discord snowflake ids.
//!
//! A snowflake carries its creation time in milliseconds since the Discord
//! epoch in its upper 42 bits; the low 22 bits are worker, process and
//! sequence counters.

use chrono::DateTime;
use scrollback_core::Timestamp;

/// 2015-01-01T00:00:00Z in Unix milliseconds
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

const TIMESTAMP_SHIFT: u32 = 22;
const LOW_BITS: u64 = (1 << TIMESTAMP_SHIFT) - 1;

/// Smallest snowflake created at `ts` (truncated to the millisecond).
pub fn low_snowflake(ts: Timestamp) -> u64 {
    let millis = ts.timestamp_millis() - DISCORD_EPOCH_MS;
    if millis <= 0 {
        return 0;
    }
    (millis as u64) << TIMESTAMP_SHIFT
}

/// Largest snowflake created at `ts`; "after" queries use this so nothing
/// from that millisecond is returned again.
pub fn high_snowflake(ts: Timestamp) -> u64 {
    if ts.timestamp_millis() < DISCORD_EPOCH_MS {
        return 0;
    }
    low_snowflake(ts) | LOW_BITS
}

/// Creation time encoded in a snowflake.
pub fn snowflake_time(id: u64) -> Timestamp {
    let millis = (id >> TIMESTAMP_SHIFT) as i64 + DISCORD_EPOCH_MS;
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
