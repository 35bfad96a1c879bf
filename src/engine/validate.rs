use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::limits::{MAX_VALID_YEAR, MIN_VALID_YEAR};
use crate::model::TimeRange;

use super::EngineError;

/// Parse a `YYYY-MM-DD` calendar date. Impossible dates (2024-02-30)
/// fail the same way as unparseable ones.
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidDate(s.to_string()))?;
    if date.year() < MIN_VALID_YEAR || date.year() > MAX_VALID_YEAR {
        return Err(EngineError::InvalidDate(s.to_string()));
    }
    Ok(date)
}

/// Parse a 24-hour `HH:MM` clock time.
pub fn parse_time(s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| EngineError::InvalidRange("time must be HH:MM"))
}

/// Time-Range Validator: normalize a `(date, start, end)` request into
/// typed values. Pure — no clocks, no state.
pub fn validate_range(date: &str, start: &str, end: &str) -> Result<(NaiveDate, TimeRange), EngineError> {
    let date = parse_date(date)?;
    let range = validate_times(start, end)?;
    Ok((date, range))
}

/// The time half of `validate_range`, for callers that already hold a
/// typed date (recurrence rules, opening hours).
pub fn validate_times(start: &str, end: &str) -> Result<TimeRange, EngineError> {
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    if end <= start {
        return Err(EngineError::InvalidRange("end must be after start"));
    }
    Ok(TimeRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_request() {
        let (date, range) = validate_range("2024-03-01", "09:00", "10:30").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(range.duration_minutes(), 90);
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(matches!(
            validate_range("2024-03-01", "10:00", "09:00"),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn rejects_zero_length_range() {
        // end == start is inverted under half-open semantics
        assert!(matches!(
            validate_range("2024-03-01", "10:00", "10:00"),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn rejects_impossible_date() {
        assert!(matches!(
            validate_range("2024-02-30", "09:00", "10:00"),
            Err(EngineError::InvalidDate(_))
        ));
    }

    #[test]
    fn rejects_malformed_date() {
        assert!(matches!(
            validate_range("03/01/2024", "09:00", "10:00"),
            Err(EngineError::InvalidDate(_))
        ));
    }

    #[test]
    fn rejects_out_of_band_year() {
        assert!(matches!(
            validate_range("1970-01-01", "09:00", "10:00"),
            Err(EngineError::InvalidDate(_))
        ));
    }

    #[test]
    fn rejects_malformed_time() {
        assert!(matches!(
            validate_range("2024-03-01", "9 am", "10:00"),
            Err(EngineError::InvalidRange(_))
        ));
        assert!(matches!(
            validate_range("2024-03-01", "09:00", "25:00"),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn leap_day_parses() {
        assert!(validate_range("2024-02-29", "09:00", "10:00").is_ok());
        assert!(validate_range("2023-02-29", "09:00", "10:00").is_err());
    }
}
