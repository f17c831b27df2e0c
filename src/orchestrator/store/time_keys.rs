use chrono::{
    DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc,
};

/// Layout used when the request path writes `created_at` (naive local time).
pub const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

pub fn unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn format_local(ts: &DateTime<Local>) -> String {
    ts.format(TIME_LAYOUT).to_string()
}

pub fn local_from_naive(naive: &NaiveDateTime) -> Option<DateTime<Local>> {
    match Local.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(a, b) => Some(a.min(b)),
        LocalResult::None => None,
    }
}

pub fn start_of_hour(ts: &DateTime<Local>) -> DateTime<Local> {
    let into_hour = Duration::seconds(i64::from(ts.minute()) * 60 + i64::from(ts.second()))
        + Duration::nanoseconds(i64::from(ts.nanosecond()));
    *ts - into_hour
}

pub fn start_of_day(ts: &DateTime<Local>) -> DateTime<Local> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| local_from_naive(&midnight))
        // Midnight can fall into a DST gap; back off by the elapsed wall-clock time instead.
        .unwrap_or_else(|| {
            *ts - Duration::seconds(i64::from(ts.num_seconds_from_midnight()))
                - Duration::nanoseconds(i64::from(ts.nanosecond()))
        })
}

/// Lower bound for a textual `created_at >= ?` prefilter.
///
/// Every encoding we accept starts with `YYYY-MM-DD`, so comparing against the
/// date one day earlier never drops a row whose offset pushes it into the window.
pub fn prefilter_key(window_start: &DateTime<Local>) -> String {
    (*window_start - Duration::days(1))
        .format("%Y-%m-%d")
        .to_string()
}

/// Parses the `created_at` text of a request log row into local time.
///
/// Rows were written by several versions of the request path, so this accepts
/// naive local timestamps, ISO-8601 with or without offset, `date time offset`,
/// `date time offset zone` (with an optional monotonic `m=` suffix) and
/// `date time zone`. Date-only or otherwise unparsable text yields `None`.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = raw
        .split_whitespace()
        .filter(|t| !t.starts_with("m="))
        .collect();
    let joined = tokens.join(" ");

    if let Some(dt) = parse_with_offset(&joined) {
        return Some(dt.with_timezone(&Local));
    }

    // Trailing zone name: `... -0700 MST` or `... MST`.
    if tokens.len() >= 3 {
        let last = tokens[tokens.len() - 1];
        if last.chars().all(|c| c.is_ascii_alphabetic()) {
            let head = tokens[..tokens.len() - 1].join(" ");
            if let Some(dt) = parse_with_offset(&head) {
                return Some(dt.with_timezone(&Local));
            }
            if let Some(naive) = parse_naive(&head) {
                if matches!(last.to_ascii_uppercase().as_str(), "UTC" | "GMT" | "Z") {
                    return Some(Utc.from_utc_datetime(&naive).with_timezone(&Local));
                }
                return local_from_naive(&naive);
            }
        }
    }

    parse_naive(&joined).and_then(|naive| local_from_naive(&naive))
}

fn parse_with_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let t_form = s.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&t_form) {
        return Some(dt);
    }
    const LAYOUTS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f %z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f %:z",
    ];
    LAYOUTS
        .iter()
        .find_map(|layout| DateTime::parse_from_str(s, layout).ok())
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(s, layout).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn parses_legacy_encodings_of_the_same_instant() {
        let expected = local(2025, 6, 15, 10, 5, 0);
        let offset = expected.format("%z").to_string();
        let colon_offset = expected.format("%:z").to_string();
        let encodings = [
            "2025-06-15 10:05:00".to_string(),
            "2025-06-15T10:05:00".to_string(),
            " 2025-06-15 10:05:00.000000 ".to_string(),
            expected.to_rfc3339(),
            format!("2025-06-15 10:05:00{colon_offset}"),
            format!("2025-06-15 10:05:00 {offset}"),
            format!("2025-06-15T10:05:00{offset}"),
            format!("2025-06-15 10:05:00.123456789 {offset} XYZ"),
            format!("2025-06-15 10:05:00 {offset} XYZ m=+0.000123"),
        ];
        for raw in encodings {
            let parsed = parse_created_at(&raw)
                .unwrap_or_else(|| panic!("failed to parse {raw:?}"));
            assert_eq!(start_of_hour(&parsed), start_of_hour(&expected), "{raw}");
            assert_eq!(parsed.timestamp(), expected.timestamp(), "{raw}");
        }
    }

    #[test]
    fn zone_name_only_is_utc_or_local() {
        let utc = parse_created_at("2025-06-15 10:05:00 UTC").unwrap();
        assert_eq!(
            utc.timestamp(),
            Utc.with_ymd_and_hms(2025, 6, 15, 10, 5, 0).unwrap().timestamp()
        );
        let named = parse_created_at("2025-06-15 10:05:00 CST").unwrap();
        assert_eq!(named, local(2025, 6, 15, 10, 5, 0));
    }

    #[test]
    fn rejects_date_only_and_garbage() {
        assert!(parse_created_at("").is_none());
        assert!(parse_created_at("2025-06-15").is_none());
        assert!(parse_created_at("yesterday at noon").is_none());
    }

    #[test]
    fn hour_and_day_truncation() {
        let ts = local(2025, 6, 15, 10, 59, 59);
        assert_eq!(start_of_hour(&ts), local(2025, 6, 15, 10, 0, 0));
        assert_eq!(start_of_day(&ts), local(2025, 6, 15, 0, 0, 0));
        assert_eq!(prefilter_key(&start_of_day(&ts)), "2025-06-14");
        assert_eq!(format_local(&ts), "2025-06-15 10:59:59");
    }
}
