//! Per-record semantic validation.

use crate::model::{ShipmentRecord, ValidationError};

/// Accepted values for the `status` column, compared case-insensitively.
pub const VALID_STATUSES: [&str; 5] = ["pending", "in_transit", "delivered", "returned", "lost"];

const STATUS_EXPECTED: &str = "pending|in_transit|delivered|returned|lost";

/// Checks one parsed record against the schema. Checks run in a fixed
/// order and the first failing constraint wins, so a row yields at most one
/// error. The record itself is untouched; callers lowercase `status` before
/// persisting an accepted record.
pub fn validate(record: &ShipmentRecord) -> Result<(), ValidationError> {
    let reject = |field, expected, actual: &str| {
        Err(ValidationError::new(
            record.row_number,
            field,
            expected,
            actual,
            record.batch_id.clone(),
        ))
    };

    let tracking = record.tracking_number.as_str();
    if tracking.len() < 10 || tracking.len() > 30 {
        return reject("tracking_number", "alphanumeric, 10-30 chars", tracking);
    }
    if !tracking.chars().all(|c| c.is_ascii_alphanumeric()) {
        return reject("tracking_number", "alphanumeric only", tracking);
    }

    if record.origin.trim().is_empty() {
        return reject("origin", "non-empty string", &record.origin);
    }
    if record.destination.trim().is_empty() {
        return reject("destination", "non-empty string", &record.destination);
    }

    if !(record.weight_kg > 0.0) {
        return reject("weight_kg", "positive number", &record.weight_kg.to_string());
    }

    if record.length_cm < 0.0 {
        return reject("length_cm", "non-negative number", &record.length_cm.to_string());
    }
    if record.width_cm < 0.0 {
        return reject("width_cm", "non-negative number", &record.width_cm.to_string());
    }
    if record.height_cm < 0.0 {
        return reject("height_cm", "non-negative number", &record.height_cm.to_string());
    }

    if !is_valid_ship_date(&record.ship_date) {
        return reject("ship_date", "ISO 8601 date (YYYY-MM-DD)", &record.ship_date);
    }

    let status_ok = VALID_STATUSES
        .iter()
        .any(|valid| valid.eq_ignore_ascii_case(&record.status));
    if !status_ok {
        return reject("status", STATUS_EXPECTED, &record.status);
    }

    Ok(())
}

/// Strict `YYYY-MM-DD`: exactly ten bytes, digits and hyphens in place, a
/// calendar-valid date (leap years included) and a sane year window.
fn is_valid_ship_date(date: &str) -> bool {
    let bytes = date.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let digits_at = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    if !digits_at(0..4) || !digits_at(5..7) || !digits_at(8..10) {
        return false;
    }

    let year: i32 = date[0..4].parse().unwrap_or(0);
    let month: u32 = date[5..7].parse().unwrap_or(0);
    let day: u32 = date[8..10].parse().unwrap_or(0);
    if !(1900..=2100).contains(&year) {
        return false;
    }
    chrono::NaiveDate::from_ymd_opt(year, month, day).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ShipmentRecord {
        ShipmentRecord {
            tracking_number: "TRACK12345".into(),
            origin: "Rotterdam".into(),
            destination: "Hamburg".into(),
            weight_kg: 12.5,
            length_cm: 10.0,
            width_cm: 0.0,
            height_cm: 0.0,
            ship_date: "2024-01-02".into(),
            status: "pending".into(),
            row_number: 1,
            batch_id: "batch-1".into(),
        }
    }

    #[test]
    fn accepts_a_valid_record() {
        assert_eq!(validate(&record()), Ok(()));
    }

    #[test]
    fn tracking_number_length_bounds() {
        let mut r = record();
        r.tracking_number = "SHORT".into();
        assert_eq!(validate(&r).unwrap_err().field, "tracking_number");

        r.tracking_number = "A".repeat(31);
        assert_eq!(validate(&r).unwrap_err().field, "tracking_number");

        r.tracking_number = "A".repeat(30);
        assert_eq!(validate(&r), Ok(()));
        r.tracking_number = "A".repeat(10);
        assert_eq!(validate(&r), Ok(()));
    }

    #[test]
    fn tracking_number_rejects_non_alphanumerics() {
        let mut r = record();
        r.tracking_number = "TRACK-12345".into();
        let err = validate(&r).unwrap_err();
        assert_eq!(err.field, "tracking_number");
        assert_eq!(err.expected, "alphanumeric only");
    }

    #[test]
    fn origin_and_destination_must_be_non_empty() {
        let mut r = record();
        r.origin = "   ".into();
        assert_eq!(validate(&r).unwrap_err().field, "origin");

        let mut r = record();
        r.destination = String::new();
        assert_eq!(validate(&r).unwrap_err().field, "destination");
    }

    #[test]
    fn weight_must_be_strictly_positive() {
        let mut r = record();
        r.weight_kg = 0.0;
        assert_eq!(validate(&r).unwrap_err().field, "weight_kg");
        r.weight_kg = -1.0;
        assert_eq!(validate(&r).unwrap_err().field, "weight_kg");
        r.weight_kg = f64::NAN;
        assert_eq!(validate(&r).unwrap_err().field, "weight_kg");
    }

    #[test]
    fn dimensions_must_be_non_negative() {
        let mut r = record();
        r.width_cm = -0.5;
        assert_eq!(validate(&r).unwrap_err().field, "width_cm");
    }

    #[test]
    fn leap_day_is_calendar_checked() {
        let mut r = record();
        r.ship_date = "2024-02-29".into();
        assert_eq!(validate(&r), Ok(()));

        r.ship_date = "2023-02-29".into();
        let err = validate(&r).unwrap_err();
        assert_eq!(err.field, "ship_date");
        assert_eq!(err.actual, "2023-02-29");
    }

    #[test]
    fn ship_date_must_be_exactly_ten_bytes() {
        let mut r = record();
        for bad in ["2024-1-02", "2024/01/02", "20240102", "", "2024-01-02T00"] {
            r.ship_date = bad.into();
            assert_eq!(validate(&r).unwrap_err().field, "ship_date", "{bad}");
        }
    }

    #[test]
    fn ship_date_year_window() {
        let mut r = record();
        r.ship_date = "1899-12-31".into();
        assert_eq!(validate(&r).unwrap_err().field, "ship_date");
        r.ship_date = "2101-01-01".into();
        assert_eq!(validate(&r).unwrap_err().field, "ship_date");
    }

    #[test]
    fn status_is_case_insensitive() {
        let mut r = record();
        for ok in ["PENDING", "In_Transit", "delivered", "RETURNED", "lost"] {
            r.status = ok.into();
            assert_eq!(validate(&r), Ok(()), "{ok}");
        }
    }

    #[test]
    fn unknown_status_is_rejected_with_the_allowed_set() {
        let mut r = record();
        r.status = "SHIPPED".into();
        let err = validate(&r).unwrap_err();
        assert_eq!(err.field, "status");
        assert_eq!(err.actual, "SHIPPED");
        assert!(err.expected.contains("pending|in_transit"));
    }

    #[test]
    fn first_failing_constraint_wins() {
        let mut r = record();
        r.tracking_number = "x".into();
        r.status = "bogus".into();
        assert_eq!(validate(&r).unwrap_err().field, "tracking_number");
    }
}
