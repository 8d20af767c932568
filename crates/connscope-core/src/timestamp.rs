use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

/// Wall-clock value read from a log timestamp.
///
/// An explicit offset is kept as written, never converted, so the hour
/// reflects what the host clock showed when the connection happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTimestamp {
    pub wall: NaiveDateTime,
    /// Set when the text could not be parsed and "now" was used instead.
    pub fallback: bool,
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Expands an hour-only offset (`+08`) to `+08:00`. Only applies after a
/// time of day, so a bare `2024-01-06` is left alone.
fn expand_hour_offset(s: &str) -> Option<String> {
    let split = s.len().checked_sub(3)?;
    let (head, tail) = (s.get(..split)?, s.get(split..)?);
    let mut chars = tail.chars();
    let sign = chars.next()?;
    if !matches!(sign, '+' | '-') || !chars.all(|c| c.is_ascii_digit()) || !head.contains(':') {
        return None;
    }
    Some(format!("{s}:00"))
}

/// Strict parse; `None` when no supported layout matches.
pub fn try_parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    let expanded = expand_hour_offset(s);
    for candidate in std::iter::once(s).chain(expanded.as_deref()) {
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.naive_local());
            }
        }
    }

    let naive = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')).unwrap_or(s);
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(naive, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parses `raw`, substituting the current local time when it is not a
/// recognizable timestamp.
pub fn parse_timestamp(raw: &str) -> ParsedTimestamp {
    match try_parse_timestamp(raw) {
        Some(wall) => ParsedTimestamp { wall, fallback: false },
        None => {
            tracing::warn!(timestamp = raw, "unparseable timestamp, using current time");
            ParsedTimestamp {
                wall: Local::now().naive_local(),
                fallback: true,
            }
        }
    }
}

pub fn format_timestamp(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn wall(s: &str) -> NaiveDateTime {
        try_parse_timestamp(s).unwrap_or_else(|| panic!("failed to parse {s}"))
    }

    #[test]
    fn test_offset_is_not_converted() {
        let dt = wall("2024-03-01T23:15:00+08:00");
        assert_eq!(dt.hour(), 23);
        let dt = wall("2024-03-01T23:15:00.123456+0800");
        assert_eq!(dt.hour(), 23);
        assert_eq!(format_timestamp(&dt), "2024-03-01 23:15:00");
    }

    #[test]
    fn test_common_layouts() {
        assert_eq!(wall("2024-01-06T23:30:00").hour(), 23);
        assert_eq!(wall("2024-01-06 08:05:09").hour(), 8);
        assert_eq!(wall("2024-01-06T08:05:09Z").hour(), 8);
        assert_eq!(wall("2024-01-06T08:05:09.5Z").hour(), 8);
        assert_eq!(wall("2024-01-06").hour(), 0);
    }

    #[test]
    fn test_hour_only_offset() {
        let dt = wall("2024-01-06T23:30:00+08");
        assert_eq!((dt.hour(), dt.minute()), (23, 30));
        assert_eq!(wall("2024-01-06 07:00:00-05").hour(), 7);
        assert_eq!(expand_hour_offset("2024-01-06"), None);
        assert_eq!(expand_hour_offset("2024-01-06T23:30:00+08").as_deref(), Some("2024-01-06T23:30:00+08:00"));
    }

    #[test]
    fn test_month_first_slash_layouts() {
        let dt = wall("01/06/2024 23:30:00");
        assert_eq!(format_timestamp(&dt), "2024-01-06 23:30:00");
        assert_eq!(wall("1/6/2024 9:05").hour(), 9);
        assert_eq!(format_timestamp(&wall("12/31/2023")), "2023-12-31 00:00:00");
        assert_eq!(wall("2024/01/06 23:30").hour(), 23);
        assert!(try_parse_timestamp("13/01/2024 10:00:00").is_none());
    }

    #[test]
    fn test_fallback_is_flagged() {
        let parsed = parse_timestamp("yesterday-ish");
        assert!(parsed.fallback);
        let parsed = parse_timestamp("2024-01-06T23:30:00");
        assert!(!parsed.fallback);
        assert!(try_parse_timestamp("").is_none());
    }
}
