//! Parsing of the `analysedAt` timestamp sent by the Sonar server.
//!
//! The server writes a local date-time followed by an offset in one of
//! several shapes: `+01:00`, `+0100`, `+01` or `Z`. The offset is taken
//! literally; no timezone database is consulted.

use chrono::{FixedOffset, NaiveDateTime};

const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TimestampError {
    #[error("timestamp {0:?} has no time part")]
    MissingTime(String),
    #[error("timestamp {0:?} has an invalid UTC offset")]
    InvalidOffset(String),
    #[error("timestamp {0:?} is not an ISO-8601 local date-time")]
    InvalidDateTime(String),
}

/// Parses a Sonar timestamp into milliseconds since the unix epoch (UTC).
///
/// A timestamp without any offset is read as UTC.
pub fn parse_timestamp(timestamp: &str) -> Result<i64, TimestampError> {
    let timestamp = timestamp.trim();
    let (local, offset_seconds) = split_offset(timestamp)?;

    let local = LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(local, format).ok())
        .ok_or_else(|| TimestampError::InvalidDateTime(timestamp.to_string()))?;

    let offset = FixedOffset::east_opt(offset_seconds)
        .ok_or_else(|| TimestampError::InvalidOffset(timestamp.to_string()))?;

    let zoned = local
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| TimestampError::InvalidDateTime(timestamp.to_string()))?;

    Ok(zoned.timestamp_millis())
}

/// Splits the trailing offset off the timestamp, returning the local part
/// and the offset in seconds east of UTC.
fn split_offset(timestamp: &str) -> Result<(&str, i32), TimestampError> {
    if let Some(local) = timestamp.strip_suffix('Z') {
        return Ok((local, 0));
    }

    let time_start = timestamp
        .find('T')
        .ok_or_else(|| TimestampError::MissingTime(timestamp.to_string()))?;

    // The time part never contains a sign, so the last one starts the offset.
    let Some(sign_index) = timestamp[time_start..]
        .rfind(['+', '-'])
        .map(|i| time_start + i)
    else {
        return Ok((timestamp, 0));
    };

    let (local, offset) = timestamp.split_at(sign_index);
    let seconds = parse_offset(offset)
        .ok_or_else(|| TimestampError::InvalidOffset(timestamp.to_string()))?;

    Ok((local, seconds))
}

fn parse_offset(offset: &str) -> Option<i32> {
    let (sign, digits) = match offset.split_at(1) {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    if !digits.is_ascii() {
        return None;
    }

    let (hours, minutes) = match digits.len() {
        2 => (digits, "00"),
        4 => digits.split_at(2),
        5 if digits.as_bytes()[2] == b':' => (&digits[..2], &digits[3..]),
        _ => return None,
    };

    if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 18 || minutes > 59 {
        return None;
    }

    Some(sign * (hours * 3600 + minutes * 60))
}
