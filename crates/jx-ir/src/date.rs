//! Date and duration literals
//!
//! Dates are plain numbers (unix seconds). Accepted inputs: numbers, ISO-8601
//! strings, `now`, `today`, and those two anchors shifted by a duration such
//! as `today-week` or `now+2hour`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::{JxError, Result};

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;

pub fn parse_date(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| JxError::parse(format!("Bad date number {n}"))),
        Value::String(s) => parse_date_str(s.trim()),
        other => Err(JxError::parse(format!("Can not interpret {other} as a date"))),
    }
}

fn parse_date_str(text: &str) -> Result<f64> {
    for anchor in ["now", "today"] {
        if let Some(rest) = text.strip_prefix(anchor) {
            let base = anchor_value(anchor);
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(base);
            }
            let (sign, amount) = match rest.split_at(1) {
                ("+", d) => (1.0, d),
                ("-", d) => (-1.0, d),
                _ => return Err(JxError::parse(format!("Bad relative date {text}"))),
            };
            return Ok(base + sign * parse_duration(amount.trim())?);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(timestamp(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(timestamp(dt.and_utc()));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(timestamp(dt.and_utc()));
        }
    }
    Err(JxError::parse(format!("Can not interpret {text:?} as a date")))
}

fn anchor_value(anchor: &str) -> f64 {
    let now = Utc::now();
    match anchor {
        "today" => {
            let secs = now.timestamp() as f64;
            (secs / DAY).floor() * DAY
        }
        _ => timestamp(now),
    }
}

fn timestamp(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0
}

/// Length of a duration string in seconds, e.g. `day`, `2hour`, `30second`.
pub fn parse_duration(text: &str) -> Result<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount = if amount.is_empty() {
        1.0
    } else {
        amount
            .parse::<f64>()
            .map_err(|_| JxError::Domain(format!("Bad duration {text:?}")))?
    };
    let unit = match unit.trim().trim_end_matches('s') {
        "second" => 1.0,
        "minute" => MINUTE,
        "hour" => HOUR,
        "day" => DAY,
        "week" => WEEK,
        other => {
            return Err(JxError::Domain(format!("Unsupported duration unit {other:?}")));
        }
    };
    Ok(amount * unit)
}

/// Duration given either as a number of seconds or a duration string.
pub fn duration_value(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| JxError::Domain(format!("Bad duration {n}"))),
        Value::String(s) => parse_duration(s),
        other => Err(JxError::Domain(format!("Can not interpret {other} as a duration"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_iso_dates() {
        assert_eq!(parse_date(&json!("1970-01-02")).unwrap(), DAY);
        assert_eq!(parse_date(&json!("1970-01-01T01:00:00")).unwrap(), HOUR);
        assert_eq!(parse_date(&json!("1970-01-01T00:01:00Z")).unwrap(), MINUTE);
        assert_eq!(parse_date(&json!(42)).unwrap(), 42.0);
        assert!(parse_date(&json!("yesterday-ish")).is_err());
    }

    #[test]
    fn test_relative_dates() {
        let today = parse_date(&json!("today")).unwrap();
        assert_eq!(today % DAY, 0.0);
        assert_eq!(parse_date(&json!("today-week")).unwrap(), today - WEEK);
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration("day").unwrap(), DAY);
        assert_eq!(parse_duration("2hour").unwrap(), 2.0 * HOUR);
        assert_eq!(parse_duration("30seconds").unwrap(), 30.0);
        assert!(parse_duration("month").is_err());
    }
}
