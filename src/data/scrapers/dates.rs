//! Date and kickoff-time normalisation for results pages
//!
//! Results listings give dates in several shapes ("14.05.", "SAT, 17 May",
//! "Today") and often omit the year, so the season year is supplied by the
//! caller. `today` is a parameter so the relative forms stay testable.

use chrono::{Duration, NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

fn day_name_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]{2,10},?\s+").expect("static regex"))
}

fn listing_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+(?:results|fixtures)\b.*$").expect("static regex"))
}

fn day_month() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})\.?$").expect("static regex"))
}

fn clock_with_status() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}:\d{2})([A-Za-z]*)$").expect("static regex"))
}

/// Resolve a listing date header or cell to a calendar date
pub fn normalize_date(raw: &str, season_year: i32, today: NaiveDate) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains("N/A") {
        return None;
    }

    let lower = trimmed.to_lowercase();
    if lower.contains("today") {
        return Some(today);
    }
    if lower.contains("tomorrow") {
        return today.checked_add_signed(Duration::days(1));
    }
    if lower.contains("yesterday") {
        return today.checked_sub_signed(Duration::days(1));
    }

    let cleaned = day_name_prefix().replace(trimmed, "");
    let cleaned = listing_suffix().replace(cleaned.trim(), "");
    let cleaned = cleaned.trim();

    match cleaned.matches('.').count() {
        1 | 2 => {
            let parts: Vec<&str> = cleaned.split('.').filter(|p| !p.is_empty()).collect();
            let day: u32 = parts.first()?.trim().parse().ok()?;
            let month: u32 = parts.get(1)?.trim().parse().ok()?;
            let year: i32 = match parts.get(2) {
                Some(y) => y.trim().parse().ok()?,
                None => season_year,
            };
            NaiveDate::from_ymd_opt(year, month, day)
        }
        0 if cleaned.split_whitespace().count() == 2 => {
            // %B also accepts the abbreviated month name
            NaiveDate::parse_from_str(&format!("{} {}", cleaned, season_year), "%d %B %Y").ok()
        }
        0 if cleaned.split_whitespace().count() == 3 => {
            NaiveDate::parse_from_str(cleaned, "%d %B %Y").ok()
        }
        _ => None,
    }
}

/// Contents of a listing's time cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeCell {
    /// Day and month, when the cell carries a date ("14.05. 19:45")
    pub day_month: Option<(u32, u32)>,
    pub time: Option<NaiveTime>,
    /// Qualifier such as "FT", "AET" or "PEN"
    pub status: Option<String>,
}

impl TimeCell {
    /// Full date of the cell in the given season
    pub fn date_in(&self, season_year: i32) -> Option<NaiveDate> {
        let (day, month) = self.day_month?;
        NaiveDate::from_ymd_opt(season_year, month, day)
    }

    /// Kickoff formatted as HH:MM
    pub fn time_string(&self) -> Option<String> {
        self.time.map(|t| t.format("%H:%M").to_string())
    }
}

/// Split a time cell into its date, kickoff and status parts
pub fn parse_time_cell(raw: &str) -> TimeCell {
    let mut cell = TimeCell::default();

    for token in raw.split_whitespace() {
        if let Some(caps) = day_month().captures(token) {
            let day = caps[1].parse().ok();
            let month = caps[2].parse().ok();
            if let (Some(d), Some(m)) = (day, month) {
                cell.day_month = Some((d, m));
            }
        } else if let Some(caps) = clock_with_status().captures(token) {
            cell.time = NaiveTime::parse_from_str(&caps[1], "%H:%M").ok();
            if !caps[2].is_empty() {
                cell.status = Some(caps[2].to_uppercase());
            }
        } else {
            let word = token.trim_matches(|c: char| !c.is_alphanumeric());
            if !word.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic()) {
                cell.status = Some(word.to_string());
            } else {
                log::debug!("Unrecognised time token '{}' in '{}'", token, raw);
            }
        }
    }

    cell
}

/// Render a date in the CSV's dd.mm.yyyy format
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// Parse a CSV date, accepting dd.mm.yyyy or ISO
pub fn parse_csv_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_relative_dates() {
        assert_eq!(normalize_date("Today", 2025, today()), ymd(2025, 5, 20));
        assert_eq!(normalize_date("Tomorrow", 2025, today()), ymd(2025, 5, 21));
        assert_eq!(normalize_date("yesterday", 2025, today()), ymd(2025, 5, 19));
    }

    #[test]
    fn test_day_month_forms_use_season_year() {
        assert_eq!(normalize_date("14.05.", 2025, today()), ymd(2025, 5, 14));
        assert_eq!(normalize_date("14.05", 2025, today()), ymd(2025, 5, 14));
        assert_eq!(normalize_date("SAT, 14.05.", 2024, today()), ymd(2024, 5, 14));
        assert_eq!(normalize_date("01.02.2023", 2025, today()), ymd(2023, 2, 1));
    }

    #[test]
    fn test_month_name_forms() {
        assert_eq!(normalize_date("17 May", 2025, today()), ymd(2025, 5, 17));
        assert_eq!(normalize_date("Sun 17 March", 2025, today()), ymd(2025, 3, 17));
        assert_eq!(normalize_date("17 Mar results", 2025, today()), ymd(2025, 3, 17));
        assert_eq!(normalize_date("2 Jun 2015", 2025, today()), ymd(2015, 6, 2));
    }

    #[test]
    fn test_unparseable_dates() {
        assert_eq!(normalize_date("", 2025, today()), None);
        assert_eq!(normalize_date("Date N/A", 2025, today()), None);
        assert_eq!(normalize_date("31.02.", 2025, today()), None);
        assert_eq!(normalize_date("Round 5", 2025, today()), None);
    }

    #[test]
    fn test_time_cell_with_date() {
        let cell = parse_time_cell("14.05. 19:45");
        assert_eq!(cell.day_month, Some((14, 5)));
        assert_eq!(cell.time_string().as_deref(), Some("19:45"));
        assert_eq!(cell.status, None);
        assert_eq!(cell.date_in(2025), ymd(2025, 5, 14));
    }

    #[test]
    fn test_time_cell_status_suffix() {
        let cell = parse_time_cell("14.05. 19:45AET");
        assert_eq!(cell.time_string().as_deref(), Some("19:45"));
        assert_eq!(cell.status.as_deref(), Some("AET"));

        let cell = parse_time_cell("FT");
        assert_eq!(cell.time, None);
        assert_eq!(cell.status.as_deref(), Some("FT"));

        let cell = parse_time_cell("Postp.");
        assert_eq!(cell.status.as_deref(), Some("Postp"));
    }

    #[test]
    fn test_csv_date_format() {
        let d = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(format_date(d), "01.02.2025");
        assert_eq!(parse_csv_date("01.02.2025"), Some(d));
        assert_eq!(parse_csv_date("2025-02-01"), Some(d));
        assert_eq!(parse_csv_date("Date N/A"), None);
    }
}
