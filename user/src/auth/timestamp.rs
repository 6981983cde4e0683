//! ISO 8601 basic-format timestamps: `YYYYMMDDTHHMMSS` followed by `Z`,
//! `±HHMM`, `±HH` or nothing (read as UTC). Fractional seconds are dropped.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Format used in the timestamp header.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Formats `at` for the timestamp header.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a basic-format timestamp into UTC. Returns `None` when malformed.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.len() < 15 || !value.is_char_boundary(15) {
        return None;
    }
    let (base, mut rest) = value.split_at(15);
    let naive = NaiveDateTime::parse_from_str(base, "%Y%m%dT%H%M%S").ok()?;

    if let Some(fraction) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(',')) {
        let digits = fraction.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        rest = &fraction[digits..];
    }

    let offset = match rest {
        "" | "Z" => Duration::zero(),
        _ => {
            let sign = match rest.as_bytes()[0] {
                b'+' => 1,
                b'-' => -1,
                _ => return None,
            };
            let digits = &rest[1..];
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let (hours, minutes) = match digits.len() {
                2 => (digits.parse::<i64>().ok()?, 0),
                4 => (digits[..2].parse::<i64>().ok()?, digits[2..].parse::<i64>().ok()?),
                _ => return None,
            };
            if hours > 23 || minutes > 59 {
                return None;
            }
            let magnitude = Duration::hours(hours) + Duration::minutes(minutes);
            if sign < 0 {
                -magnitude
            } else {
                magnitude
            }
        }
    };

    // Local time minus its offset is UTC.
    Some(naive.and_utc() - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[rstest]
    #[case("20101231T142342Z", utc(2010, 12, 31, 14, 23, 42))]
    #[case("20101231T142342", utc(2010, 12, 31, 14, 23, 42))]
    #[case("20101231T142342-0500", utc(2010, 12, 31, 19, 23, 42))]
    #[case("20101231T142342+0100", utc(2010, 12, 31, 13, 23, 42))]
    #[case("20101231T232342-0500", utc(2011, 1, 1, 4, 23, 42))]
    #[case("20101231T002342+0100", utc(2010, 12, 30, 23, 23, 42))]
    #[case("20101231T142342+0530", utc(2010, 12, 31, 8, 53, 42))]
    #[case("20101231T142342-03", utc(2010, 12, 31, 17, 23, 42))]
    #[case("20101231T142342.123Z", utc(2010, 12, 31, 14, 23, 42))]
    fn test_parse_valid(#[case] input: &str, #[case] expected: DateTime<Utc>) {
        assert_eq!(parse_timestamp(input), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("2010-12-31T14:23:42Z")]
    #[case("20101331T142342Z")]
    #[case("20101231T142342X")]
    #[case("20101231T142342+5")]
    #[case("20101231T142342+0560")]
    #[case("20101231T142342.Z")]
    #[case("yesterday")]
    fn test_parse_invalid(#[case] input: &str) {
        assert_eq!(parse_timestamp(input), None);
    }

    #[test]
    fn test_format_round_trip() {
        let at = utc(2024, 2, 29, 8, 5, 9);
        assert_eq!(format_timestamp(at), "20240229T080509Z");
        assert_eq!(parse_timestamp(&format_timestamp(at)), Some(at));
    }
}
