// 🗓️ Periods - Prescribing months and map change dates
//
// Warehouse extracts carry the month in several shapes depending on who wrote
// them ("2016-01-01", "2016-01-01 00:00:00 UTC", RFC 3339, "2016-01").
// Everything is normalised to a NaiveDate so comparisons are plain ordering.

use crate::error::{CheckerError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parse a prescribing month into a date
pub fn parse_period(raw: &str) -> Result<NaiveDate> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }

    // BigQuery CSV exports: "2016-01-01 00:00:00 UTC"
    let without_zone = s.trim_end_matches(" UTC");
    if let Ok(dt) = NaiveDateTime::parse_from_str(without_zone, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.date());
    }

    if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d") {
        return Ok(d);
    }

    Err(CheckerError::InvalidPeriod(raw.to_string()))
}

/// Change date for a map file: January 1 of the year in its name
///
/// # Examples:
/// ```
/// use bnf_map_checker::period::effective_date_from_file_name;
/// use chrono::NaiveDate;
///
/// let date = effective_date_from_file_name("2015.txt").unwrap();
/// assert_eq!(date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
/// ```
pub fn effective_date_from_file_name(name: &str) -> Result<NaiveDate> {
    let year = name
        .get(..4)
        .filter(|prefix| prefix.chars().all(|c| c.is_ascii_digit()))
        .and_then(|prefix| prefix.parse::<i32>().ok())
        .ok_or_else(|| CheckerError::InvalidFileName(name.to_string()))?;

    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| CheckerError::InvalidFileName(name.to_string()))
}

/// Canonical display form used in tables and cache files
pub fn format_period(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_plain_date() {
        assert_eq!(parse_period("2016-01-01").unwrap(), ymd(2016, 1, 1));
        assert_eq!(parse_period("  2019-11-01 ").unwrap(), ymd(2019, 11, 1));
    }

    #[test]
    fn test_parse_bigquery_timestamp() {
        assert_eq!(parse_period("2016-03-01 00:00:00 UTC").unwrap(), ymd(2016, 3, 1));
        assert_eq!(parse_period("2016-03-01 00:00:00").unwrap(), ymd(2016, 3, 1));
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_period("2020-07-01T00:00:00Z").unwrap(), ymd(2020, 7, 1));
    }

    #[test]
    fn test_parse_year_month() {
        assert_eq!(parse_period("2021-02").unwrap(), ymd(2021, 2, 1));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_period("last tuesday"),
            Err(CheckerError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_effective_date_from_file_name() {
        assert_eq!(effective_date_from_file_name("2019.txt").unwrap(), ymd(2019, 1, 1));
        assert_eq!(
            effective_date_from_file_name("2023_changes.txt").unwrap(),
            ymd(2023, 1, 1)
        );
    }

    #[test]
    fn test_effective_date_rejects_bad_names() {
        assert!(effective_date_from_file_name("README.txt").is_err());
        assert!(effective_date_from_file_name("20a9.txt").is_err());
        assert!(effective_date_from_file_name("201").is_err());
    }

    #[test]
    fn test_format_period() {
        assert_eq!(format_period(ymd(2015, 1, 1)), "2015-01-01");
    }
}
