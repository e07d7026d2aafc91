//! XMLTV timestamp parsing

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

/// Parse an XMLTV timestamp (`YYYYMMDDhhmmss ±hhmm`) to UTC.
///
/// Seconds and the offset are optional; a missing offset means UTC. Minutes
/// and hours may also be omitted (`YYYYMMDDhh`, `YYYYMMDD`), as some
/// providers truncate them.
pub fn parse_xmltv_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let mut parts = value.split_whitespace();
    let datetime = parts.next()?;
    let offset = parts.next();

    // Some feeds glue the offset on: 20240101120000+0100
    let (datetime, offset) = match (offset, datetime.find(['+', '-'])) {
        (None, Some(idx)) => (&datetime[..idx], Some(&datetime[idx..])),
        _ => (datetime, offset),
    };

    if !datetime.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u32> {
        match datetime.get(range) {
            Some(digits) if !digits.is_empty() => digits.parse().ok(),
            _ => Some(0),
        }
    };

    if !matches!(datetime.len(), 8 | 10 | 12 | 14) {
        return None;
    }

    let year: i32 = datetime.get(0..4)?.parse().ok()?;
    let month = field(4..6)?;
    let day = field(6..8)?;
    let hour = field(8..10)?;
    let minute = field(10..12)?;
    let second = field(12..14)?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

    let offset = match offset {
        Some(raw) => parse_offset(raw)?,
        None => FixedOffset::east_opt(0)?,
    };

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a `±hhmm` (or `±hh:mm`) offset.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, digits) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => (1, raw),
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
