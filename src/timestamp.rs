//! Canonical timestamp handling.
//!
//! Every table key in the engine is the same UTC RFC 3339 string, produced
//! here. Two inputs denoting the same instant always normalize to the
//! identical string, whatever offset notation they arrived in.
//!
//! The canonical profile (seconds precision, explicit `+00:00` offset) is
//! stable for the lifetime of a store: changing it would invalidate every
//! existing key.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};

use crate::error::EngineError;

/// Accepted forms that carry an explicit offset (RFC 3339 is tried first,
/// separately, since it also covers `Z`).
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Accepted naive forms. A naive input is treated as already UTC: the offset
/// is attached, never converted.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Normalize any parseable timestamp into the canonical key string.
pub fn normalize(input: &str) -> Result<String, EngineError> {
    parse_instant(input).map(normalize_datetime)
}

/// Serialize an instant using the canonical profile,
/// e.g. `2024-03-01T13:00:00+00:00`.
pub fn normalize_datetime(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parse a timestamp into an absolute UTC instant.
///
/// Inputs with zone information are converted to UTC; naive inputs are
/// interpreted as UTC as-is.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>, EngineError> {
    let trimmed = input.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(instant) = DateTime::parse_from_str(trimmed, format) {
            return Ok(instant.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    Err(EngineError::MalformedTimestamp {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_instant_same_key() {
        let variants = [
            "2024-03-01T13:00:00Z",
            "2024-03-01T13:00:00+00:00",
            "2024-03-01T15:00:00+02:00",
            "2024-03-01T08:00:00-05:00",
            "2024-03-01 15:00:00+02:00",
        ];
        let keys: Vec<String> = variants
            .iter()
            .map(|v| normalize(v).expect("parseable"))
            .collect();
        for key in &keys {
            assert_eq!(key, "2024-03-01T13:00:00+00:00");
        }
    }

    #[test]
    fn naive_input_is_attached_to_utc_not_converted() {
        // A naive wall-clock reading must keep its clock time.
        assert_eq!(
            normalize("2024-03-01 13:00:00").expect("parseable"),
            "2024-03-01T13:00:00+00:00"
        );
        assert_eq!(
            normalize("2024-03-01T13:00:00").expect("parseable"),
            "2024-03-01T13:00:00+00:00"
        );
    }

    #[test]
    fn date_only_becomes_midnight() {
        assert_eq!(
            normalize("2024-03-01").expect("parseable"),
            "2024-03-01T00:00:00+00:00"
        );
    }

    #[test]
    fn fractional_seconds_are_accepted() {
        assert_eq!(
            normalize("2024-03-01 13:00:00.500").expect("parseable"),
            "2024-03-01T13:00:00+00:00"
        );
    }

    #[test]
    fn canonical_form_is_a_fixed_point() {
        let key = normalize("2024-03-01T15:00:00+02:00").expect("parseable");
        assert_eq!(normalize(&key).expect("parseable"), key);
    }

    #[test]
    fn garbage_is_rejected() {
        for bad in ["", "not a date", "2024-13-40 99:99:99", "12345"] {
            match normalize(bad) {
                Err(EngineError::MalformedTimestamp { input }) => assert_eq!(input, bad),
                other => panic!("expected MalformedTimestamp for {bad:?}, got {other:?}"),
            }
        }
    }
}
