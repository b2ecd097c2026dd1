//! Fixed-width wall-clock timestamps.
//!
//! Records and history queries compare timestamps lexicographically, so the 14-digit
//! `YYYYMMDDHHMMSS` prefix must keep its exact width.

use chrono::{DateTime, Local, TimeZone};

/// Width of the `YYYYMMDDHHMMSS` form.
pub const TIMESTAMP_LEN: usize = 14;

/// `YYYYMMDDHHMMSS` in local time.
pub fn seconds_stamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d%H%M%S").to_string()
}

/// `YYYYMMDDHHMMSS` followed by three millisecond digits.
pub fn millis_stamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d%H%M%S%3f").to_string()
}

pub fn now_seconds_stamp() -> String {
    seconds_stamp(&Local::now())
}

/// True for exactly fourteen ASCII digits.
pub fn is_seconds_stamp(value: &str) -> bool {
    value.len() == TIMESTAMP_LEN && value.bytes().all(|b| b.is_ascii_digit())
}
