//! Target dates and the selection of what to scrape.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A date the studio wants availability for. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDate {
    /// `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "isbooked", default)]
    pub is_booked: bool,
}

/// Why a single or batch trigger had nothing to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NoTargets {
    #[error("No target dates are registered. Add a date before scraping.")]
    NoneRegistered,

    #[error("All registered target dates are already booked. Nothing to scrape.")]
    AllBooked,

    #[error("No upcoming target dates. All unbooked dates are in the past.")]
    NoneUpcoming,
}

/// Unbooked dates to scrape, in registration order.
///
/// With `today` set, dates before it are skipped. Date keys compare
/// lexicographically, which matches calendar order for `YYYY-MM-DD`.
pub fn select_scrape_dates(dates: &[TargetDate], today: Option<&str>) -> Result<Vec<String>, NoTargets> {
    if dates.is_empty() {
        return Err(NoTargets::NoneRegistered);
    }

    let unbooked: Vec<&TargetDate> = dates.iter().filter(|d| !d.is_booked).collect();
    if unbooked.is_empty() {
        return Err(NoTargets::AllBooked);
    }

    let selected: Vec<String> = unbooked
        .into_iter()
        .filter(|d| today.map_or(true, |today| d.date.as_str() >= today))
        .map(|d| d.date.clone())
        .collect();

    if selected.is_empty() {
        return Err(NoTargets::NoneUpcoming);
    }
    Ok(selected)
}

/// Rejected date input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDate {
    #[error("date must use the YYYY-MM-DD format")]
    Format,

    #[error("'{0}' is not a calendar date")]
    NotACalendarDate(String),
}

/// Accept only zero-padded `YYYY-MM-DD` naming a real day.
pub fn validate_date_key(raw: &str) -> Result<NaiveDate, InvalidDate> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shaped {
        return Err(InvalidDate::Format);
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| InvalidDate::NotACalendarDate(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(date: &str, is_booked: bool) -> TargetDate {
        TargetDate {
            date: date.to_string(),
            label: String::new(),
            is_booked,
        }
    }

    #[test]
    fn test_booked_dates_are_dropped() {
        let dates = [target("2025-09-15", false), target("2025-09-20", true)];
        assert_eq!(select_scrape_dates(&dates, None).unwrap(), vec!["2025-09-15"]);
    }

    #[test]
    fn test_empty_reasons_are_distinct() {
        assert_eq!(select_scrape_dates(&[], None), Err(NoTargets::NoneRegistered));

        let all_booked = [target("2025-09-15", true), target("2025-09-20", true)];
        assert_eq!(select_scrape_dates(&all_booked, None), Err(NoTargets::AllBooked));
        assert_ne!(
            NoTargets::AllBooked.to_string(),
            NoTargets::NoneRegistered.to_string()
        );
    }

    #[test]
    fn test_past_dates_skipped_when_today_given() {
        let dates = [
            target("2025-09-01", false),
            target("2025-09-15", false),
            target("2025-10-02", false),
        ];
        assert_eq!(
            select_scrape_dates(&dates, Some("2025-09-15")).unwrap(),
            vec!["2025-09-15", "2025-10-02"]
        );
        assert_eq!(
            select_scrape_dates(&dates[..1], Some("2025-09-15")),
            Err(NoTargets::NoneUpcoming)
        );
    }

    #[test]
    fn test_isbooked_wire_name() {
        let parsed: TargetDate =
            serde_json::from_str(r#"{"date":"2025-09-20","label":"Sat","isbooked":true}"#).unwrap();
        assert!(parsed.is_booked);
    }

    #[test]
    fn test_date_validation() {
        assert!(validate_date_key("2025-09-15").is_ok());
        assert!(validate_date_key("2024-02-29").is_ok());

        assert_eq!(validate_date_key("2025-13-40"), Err(InvalidDate::NotACalendarDate("2025-13-40".into())));
        assert!(matches!(validate_date_key("2025-02-29"), Err(InvalidDate::NotACalendarDate(_))));
        assert_eq!(validate_date_key("2025-9-15"), Err(InvalidDate::Format));
        assert_eq!(validate_date_key("15/09/2025"), Err(InvalidDate::Format));
        assert_eq!(validate_date_key(""), Err(InvalidDate::Format));
    }
}
