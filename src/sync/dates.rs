//! Date normalization for sheet cells.
//!
//! Sheets hand back dates as display strings (`05/03/2024`, `05/03`,
//! `2024-03-05`) or, for unformatted cells, as day serials. Everything is
//! built as a UTC calendar date so no local offset can shift the day.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use tracing::debug;

static DAY_MONTH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?$").unwrap());

/// Day 0 of the spreadsheet serial calendar (1899-12-30) is this many days
/// before the Unix epoch.
const SERIAL_EPOCH_OFFSET_DAYS: f64 = 25569.0;
const MS_PER_DAY: f64 = 86_400_000.0;

const FALLBACK_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// Parse a sheet date, assuming the current UTC year for `d/m` input.
pub fn parse_sheet_date(input: &str) -> Option<NaiveDate> {
    parse_sheet_date_in_year(input, Utc::now().year())
}

/// Parse a sheet date with an explicit default year.
///
/// Accepts `d/m`, `d/m/yy` (read as 20yy) and `d/m/yyyy`, then a few
/// unambiguous generic forms. Returns `None` for anything else, including
/// impossible calendar dates like `31/02`.
pub fn parse_sheet_date_in_year(input: &str, default_year: i32) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(caps) = DAY_MONTH_REGEX.captures(input) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = match caps.get(3) {
            None => default_year,
            Some(y) if y.as_str().len() == 2 => 2000 + y.as_str().parse::<i32>().ok()?,
            Some(y) => y.as_str().parse().ok()?,
        };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }

    FALLBACK_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
}

/// Convert a spreadsheet day serial to a UTC instant.
///
/// Serial 1 is 1899-12-31; fractional parts are times of day.
pub fn serial_to_date(serial: f64) -> Option<DateTime<Utc>> {
    if !serial.is_finite() {
        return None;
    }
    let millis = ((serial - SERIAL_EPOCH_OFFSET_DAYS) * MS_PER_DAY).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

/// Normalize a raw date cell to `YYYY-MM-DD`.
///
/// A bare number is read as a day serial. Blank or unparseable cells give
/// `None`.
pub fn normalize_date_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let date = match trimmed.parse::<f64>() {
        Ok(serial) => serial_to_date(serial).map(|dt| dt.date_naive()),
        Err(_) => parse_sheet_date(trimmed),
    };

    match date {
        Some(d) => Some(d.format("%Y-%m-%d").to_string()),
        None => {
            debug!(cell = trimmed, "unparseable date cell");
            None
        }
    }
}
