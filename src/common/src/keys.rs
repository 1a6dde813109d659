//! Tick-encoded partition keys.
//!
//! The target store keys rows by a zero-padded, base-10 tick count (100 ns
//! intervals since 0001-01-01T00:00:00Z), optionally behind a constant
//! prefix. Zero padding to a fixed width makes lexical order agree with
//! temporal order, which is what lets a purge run express its cutoff as a
//! plain key-range predicate.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{PurgeError, PurgeResult};

/// Digits in an encoded tick count.
pub const KEY_WIDTH: usize = 19;

/// Ticks elapsed between 0001-01-01 and the Unix epoch.
pub const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;

/// Tick count for an instant, saturating at zero for dates before year 1.
pub fn ticks_from_datetime(at: DateTime<Utc>) -> u64 {
    let unix_ticks = at.timestamp() * TICKS_PER_SECOND
        + (at.timestamp_subsec_nanos() / NANOS_PER_TICK) as i64;
    unix_ticks.saturating_add(TICKS_AT_UNIX_EPOCH).max(0) as u64
}

/// Instant for a tick count, if representable.
pub fn datetime_from_ticks(ticks: u64) -> Option<DateTime<Utc>> {
    let unix_ticks = i64::try_from(ticks).ok()? - TICKS_AT_UNIX_EPOCH;
    let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) as u32) * NANOS_PER_TICK;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Zero-pad a tick count to the fixed key width.
pub fn encode_ticks(ticks: u64) -> String {
    format!("{ticks:019}")
}

/// Encode an instant as a partition key, prepending the configured prefix.
pub fn encode(at: DateTime<Utc>, prefix: &str) -> String {
    format!("{prefix}{}", encode_ticks(ticks_from_datetime(at)))
}

/// Parse a partition key back to the instant it encodes.
///
/// The prefix is stripped if present; the remainder must be exactly
/// [`KEY_WIDTH`] ASCII digits. Anything else is a [`PurgeError::MalformedKey`],
/// which aborts the run: it means the table does not use the expected key
/// scheme and continuing could delete the wrong data.
pub fn decode(key: &str, prefix: &str) -> PurgeResult<DateTime<Utc>> {
    let malformed = || PurgeError::MalformedKey {
        key: key.to_string(),
    };

    let digits = key.strip_prefix(prefix).unwrap_or(key);
    if digits.len() != KEY_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let ticks: u64 = digits.parse().map_err(|_| malformed())?;
    datetime_from_ticks(ticks).ok_or_else(malformed)
}

/// The purge cutoff: rows strictly older than this instant are candidates.
pub fn cutoff(now: DateTime<Utc>, older_than_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(older_than_days))
}
