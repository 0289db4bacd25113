//! Timestamp field parsing with tolerance for real-world log output.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Parse a timestamp field into epoch seconds using a strptime-style
/// format.
///
/// Before strptime parsing, the field is normalized for irregularities
/// seen in production logs:
/// - a literal `Z` suffix is rewritten to `+0000` when the format ends in
///   a lowercase zone token (`%z`), which cannot match `Z` directly;
/// - a colon-separated offset (`+01:00`) is collapsed to `+0100` when the
///   format expects no colon;
/// - fractional seconds longer than 6 digits are truncated to 6 (some JVM
///   loggers emit 9-digit nanosecond fractions), keeping any zone suffix.
///
/// If strptime parsing still fails, the whole field is tried as a raw
/// integer epoch. `None` means the line cannot be dated; callers skip it.
pub fn parse_timestamp(raw: &str, format: &str) -> Option<i64> {
    let normalized = normalize(raw, format);
    if let Some(ts) = parse_with_format(&normalized, format) {
        return Some(ts);
    }
    raw.parse::<i64>().ok()
}

fn parse_with_format(value: &str, format: &str) -> Option<i64> {
    if format_has_zone(format) {
        DateTime::parse_from_str(value, format)
            .ok()
            .map(|dt| dt.timestamp())
    } else {
        // No zone token in the format: the time string is local time,
        // matching strptime semantics.
        let naive = NaiveDateTime::parse_from_str(value, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp())
    }
}

fn format_has_zone(format: &str) -> bool {
    ["%z", "%:z", "%::z", "%#z"]
        .iter()
        .any(|token| format.contains(token))
}

fn normalize(raw: &str, format: &str) -> String {
    let mut value = truncate_fraction(raw);
    if format.ends_with('z') {
        if value.ends_with('Z') {
            value.truncate(value.len() - 1);
            value.push_str("+0000");
        } else if !format.ends_with(":z")
            && value.len() >= 3
            && value.as_bytes()[value.len() - 3] == b':'
        {
            value.remove(value.len() - 3);
        }
    }
    value
}

/// Truncate a fractional-seconds part longer than 6 digits, preserving any
/// trailing zone suffix (`2022-05-25T12:05:15.654320355Z` becomes
/// `2022-05-25T12:05:15.654320Z`).
fn truncate_fraction(raw: &str) -> String {
    let Some((head, tail)) = raw.split_once('.') else {
        return raw.to_string();
    };
    let digits = tail.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits <= 6 {
        return raw.to_string();
    }
    format!("{head}.{}{}", &tail[..6], &tail[digits..])
}
