//! Date arguments: RFC 3339 timestamps or plain `YYYY-MM-DD` days.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

const DAY_FORMAT: &str = "%Y-%m-%d";

fn parse(value: &str, time: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, DAY_FORMAT)
        .map(|day| day.and_time(time).and_utc())
        .map_err(|_| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got {value:?}"))
}

/// Lower bound: a plain day starts at midnight UTC.
pub(crate) fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    parse(value, NaiveTime::MIN)
}

/// Upper bound: a plain day ends at its last second.
pub(crate) fn parse_until(value: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    parse(value, end_of_day)
}
