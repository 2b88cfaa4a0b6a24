//! Validation of inbound sensor payloads.
//!
//! The feed invokes the hub event with a sequence of records shaped like
//! `{ "date": "2024-06-05T14:30:00Z", "data": "21.5" }`. Only the first record
//! is consumed.

use chrono::{DateTime, NaiveDateTime, SubsecRound};
use chrono_tz::Tz;
use serde_json::Value;
use thiserror::Error;

use crate::db::models::Reading;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("message carries no records")]
    EmptyPayload,
    #[error("first record is not an object")]
    NotAnObject,
    #[error("record is missing field {0:?}")]
    MissingField(&'static str),
    #[error("temperature {0:?} is not a finite number")]
    InvalidTemperature(String),
    #[error("timestamp {0:?} is not a recognised date")]
    InvalidTimestamp(String),
}

/// Naive layouts accepted when the feed omits an offset.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Extract a `Reading` from the arguments of a hub invocation.
pub fn parse_reading(arguments: &[Value], tz: Tz) -> Result<Reading, ValidationError> {
    let record = first_record(arguments)?;
    let object = record.as_object().ok_or(ValidationError::NotAnObject)?;

    let date = object
        .get("date")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingField("date"))?;
    let data = object.get("data").ok_or(ValidationError::MissingField("data"))?;

    Ok(Reading {
        timestamp: normalize_timestamp(date, tz)?,
        temperature: parse_temperature(data)?,
    })
}

/// The record is either the first argument itself or, when the server sends
/// the whole batch as one argument, the first element of that array.
fn first_record(arguments: &[Value]) -> Result<&Value, ValidationError> {
    match arguments.first() {
        None => Err(ValidationError::EmptyPayload),
        Some(Value::Array(batch)) => batch.first().ok_or(ValidationError::EmptyPayload),
        Some(record) => Ok(record),
    }
}

fn parse_temperature(data: &Value) -> Result<f64, ValidationError> {
    let value = match data {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    // `"NaN"` and `"inf"` parse as f64 but are not temperatures.
    value
        .filter(|t| t.is_finite())
        .ok_or_else(|| ValidationError::InvalidTemperature(data.to_string()))
}

/// Convert a feed timestamp into naive local time in `tz`.
///
/// Offset-bearing timestamps (RFC 3339) are converted; naive ones are taken
/// to be local to `tz` already, so normalizing a stored value is a no-op.
/// Sub-microsecond digits are dropped to match SQL `TIMESTAMP` precision.
pub fn normalize_timestamp(raw: &str, tz: Tz) -> Result<NaiveDateTime, ValidationError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&tz).naive_local().trunc_subsecs(6));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.trunc_subsecs(6))
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use chrono_tz::US::Eastern;
    use serde_json::json;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 5).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn parses_first_record() {
        let args = vec![json!({ "date": "2024-06-05T14:30:00Z", "data": "28.5" })];
        let r = parse_reading(&args, Eastern).unwrap();
        assert_eq!(r.temperature, 28.5);
        assert_eq!(r.timestamp, at(10, 30, 0));
    }

    #[test]
    fn only_first_record_of_batch_is_used() {
        let args = vec![json!([
            { "date": "2024-06-05 10:30:00", "data": "17" },
            { "date": "2024-06-05 10:31:00", "data": "40" },
        ])];
        let r = parse_reading(&args, Eastern).unwrap();
        assert_eq!(r.temperature, 17.0);
        assert_eq!(r.timestamp, at(10, 30, 0));
    }

    #[test]
    fn numeric_data_is_accepted() {
        let args = vec![json!({ "date": "2024-06-05 10:30:00", "data": 21.25 })];
        assert_eq!(parse_reading(&args, Eastern).unwrap().temperature, 21.25);
    }

    #[test]
    fn non_numeric_data_is_rejected() {
        let args = vec![json!({ "date": "2024-06-05 10:30:00", "data": "not-a-number" })];
        assert!(matches!(
            parse_reading(&args, Eastern),
            Err(ValidationError::InvalidTemperature(_))
        ));
    }

    #[test]
    fn nan_and_infinity_are_rejected() {
        for bad in ["NaN", "inf", "-infinity"] {
            let args = vec![json!({ "date": "2024-06-05 10:30:00", "data": bad })];
            assert!(parse_reading(&args, Eastern).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn missing_fields_are_reported() {
        let args = vec![json!({ "data": "20" })];
        assert_eq!(parse_reading(&args, Eastern), Err(ValidationError::MissingField("date")));
        let args = vec![json!({ "date": "2024-06-05 10:30:00" })];
        assert_eq!(parse_reading(&args, Eastern), Err(ValidationError::MissingField("data")));
    }

    #[test]
    fn wrong_shapes_are_reported() {
        assert_eq!(parse_reading(&[], Eastern), Err(ValidationError::EmptyPayload));
        assert_eq!(parse_reading(&[json!([])], Eastern), Err(ValidationError::EmptyPayload));
        assert_eq!(parse_reading(&[json!("21.5")], Eastern), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn bad_timestamp_is_reported() {
        let args = vec![json!({ "date": "yesterday", "data": "20" })];
        assert!(matches!(
            parse_reading(&args, Eastern),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn offsets_are_converted_to_reference_zone() {
        // Winter: EST is UTC-5.
        let ts = normalize_timestamp("2024-01-15T17:00:00+00:00", Eastern).unwrap();
        assert_eq!(ts, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(12, 0, 0).unwrap());
        // Another offset, same instant as 10:30 EDT.
        let ts = normalize_timestamp("2024-06-05T16:30:00+02:00", Eastern).unwrap();
        assert_eq!(ts, at(10, 30, 0));
    }

    #[test]
    fn long_fractions_are_accepted() {
        let ts = normalize_timestamp("2024-06-05T14:30:00.1234567Z", Eastern).unwrap();
        assert_eq!(ts.and_utc().timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn output_is_microsecond_aligned() {
        for raw in [
            "2024-06-05T14:30:00.1234567Z",
            "2024-06-05T14:30:00.999999999+02:00",
            "2024-06-05 10:30:00.1234567",
            "2024-06-05T10:30:00.000000001",
        ] {
            let ts = normalize_timestamp(raw, Eastern).unwrap();
            assert_eq!(ts.and_utc().timestamp_subsec_nanos() % 1_000, 0, "{raw}");
        }
    }

    #[test]
    fn naive_timestamps_are_already_local() {
        assert_eq!(normalize_timestamp("2024-06-05T10:30:00", Eastern).unwrap(), at(10, 30, 0));
        assert_eq!(normalize_timestamp("2024-06-05 10:30:00", Eastern).unwrap(), at(10, 30, 0));
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "2024-06-05T14:30:00Z",
            "2024-11-03T05:30:00Z",
            "2024-06-05 08:00:00.5",
            "2024-06-05T14:30:00.1234567Z",
        ] {
            let once = normalize_timestamp(raw, Eastern).unwrap();
            let text = once.format("%Y-%m-%d %H:%M:%S%.f").to_string();
            let twice = normalize_timestamp(&text, Eastern).unwrap();
            assert_eq!(once, twice, "{raw}");
        }
    }
}
