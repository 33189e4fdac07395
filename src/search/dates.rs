//! Date helpers shared by the evaluator and the SQL compilers.

use chrono::{DateTime, Datelike, Local, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::result::SearchValue;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Shift a Unix time by whole calendar months.
///
/// Day-of-month is clamped to the target month (Jan 31 + 1 month is the
/// last day of February). Falls back to 30-day months when the date cannot
/// be represented.
pub fn add_months(time: i64, months: i64) -> i64 {
    if months == 0 {
        return time;
    }
    let shifted = DateTime::<Utc>::from_timestamp(time, 0).and_then(|dt| {
        let n = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        if months > 0 {
            dt.checked_add_months(n)
        } else {
            dt.checked_sub_months(n)
        }
    });
    match shifted {
        Some(dt) => dt.timestamp(),
        None => time.saturating_add(months.saturating_mul(30 * SECONDS_PER_DAY)),
    }
}

/// Convert a `make-time` argument to Unix seconds, or -1.
///
/// Accepts an ISO-8601 string (`2024-01-31`, `2024-01-31T10:00:00`,
/// RFC 3339), an 8-digit `YYYYMMDD` string, or a `YYYYMMDD` integer. Dates
/// without a time are midnight UTC.
pub fn make_time(value: &SearchValue) -> i64 {
    match value {
        SearchValue::String(s) => {
            let s = s.trim();
            if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
                return s.parse().map(yyyymmdd_to_time).unwrap_or(-1);
            }
            parse_iso8601(s).unwrap_or(-1)
        }
        SearchValue::Int(n) | SearchValue::Time(n) if *n > 9_999_999 => yyyymmdd_to_time(*n),
        _ => -1,
    }
}

fn yyyymmdd_to_time(n: i64) -> i64 {
    let (year, month, day) = (n / 10_000, (n / 100) % 100, n % 100);
    i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month as u32, day as u32))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt).timestamp())
        .unwrap_or(-1)
}

fn parse_iso8601(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y%m%dT%H%M%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt).timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt).timestamp())
}

/// Local calendar date of a Unix time as the number `YYYYMMDD`.
pub fn local_yyyymmdd(time: i64) -> i64 {
    match Local.timestamp_opt(time, 0).single() {
        Some(dt) => i64::from(dt.year()) * 10_000 + i64::from(dt.month()) * 100 + i64::from(dt.day()),
        None => 0,
    }
}

/// `compare-date`: negative, zero or positive as the local date of `a` is
/// before, equal to or after that of `b`. Non-numeric arguments give 0.
pub fn compare_date(a: &SearchValue, b: &SearchValue) -> i64 {
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => local_yyyymmdd(a) - local_yyyymmdd(b),
        _ => 0,
    }
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}
