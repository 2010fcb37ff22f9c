//! CSV export of scraped match rows
//!
//! Column layout: Season, Round, Date, Time, Home, Away, HG, AG, HTHG, HTAG, Venue

use super::scrapers::dates::{format_date, parse_csv_date};
use crate::{MatchRow, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct CsvRecord {
    #[serde(rename = "Season")]
    season: String,
    #[serde(rename = "Round")]
    round: Option<String>,
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Time")]
    time: Option<String>,
    #[serde(rename = "Home")]
    home: String,
    #[serde(rename = "Away")]
    away: String,
    #[serde(rename = "HG")]
    home_goals: Option<u32>,
    #[serde(rename = "AG")]
    away_goals: Option<u32>,
    #[serde(rename = "HTHG")]
    ht_home_goals: Option<u32>,
    #[serde(rename = "HTAG")]
    ht_away_goals: Option<u32>,
    #[serde(rename = "Venue")]
    venue: Option<String>,
}

impl From<&MatchRow> for CsvRecord {
    fn from(row: &MatchRow) -> Self {
        CsvRecord {
            season: row.season.clone(),
            round: row.round.clone(),
            date: row.date.map(format_date),
            time: row.time.clone(),
            home: row.home.clone(),
            away: row.away.clone(),
            home_goals: row.home_goals,
            away_goals: row.away_goals,
            ht_home_goals: row.ht_home_goals,
            ht_away_goals: row.ht_away_goals,
            venue: row.venue.clone(),
        }
    }
}

impl From<CsvRecord> for MatchRow {
    fn from(rec: CsvRecord) -> Self {
        MatchRow {
            season: rec.season,
            round: rec.round.filter(|s| !s.is_empty()),
            date: rec.date.as_deref().and_then(parse_csv_date),
            time: rec.time.filter(|s| !s.is_empty()),
            home: rec.home,
            away: rec.away,
            home_goals: rec.home_goals,
            away_goals: rec.away_goals,
            ht_home_goals: rec.ht_home_goals,
            ht_away_goals: rec.ht_away_goals,
            venue: rec.venue.filter(|s| !s.is_empty()),
            status: None,
        }
    }
}

/// Write match rows to a CSV file, replacing any existing file
pub fn write_csv<P: AsRef<Path>>(path: P, rows: &[MatchRow]) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(CsvRecord::from(row))?;
    }
    writer.flush()?;
    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(rows.len())
}

/// Read match rows back from a CSV file, skipping malformed rows
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<MatchRow>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut rows = Vec::new();

    for (i, record) in reader.deserialize::<CsvRecord>().enumerate() {
        match record {
            Ok(rec) => rows.push(MatchRow::from(rec)),
            Err(e) => log::warn!("Skipping CSV row {}: {}", i + 1, e),
        }
    }

    Ok(rows)
}

/// Sort rows by date and kickoff time; rows without a usable date go first
pub fn sort_rows(rows: &mut [MatchRow]) {
    fn key(row: &MatchRow) -> (NaiveDate, NaiveTime) {
        let midnight = NaiveTime::default();
        let epoch = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN);
        match row.date {
            Some(date) => {
                let time = row
                    .time
                    .as_deref()
                    .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
                    .unwrap_or(midnight);
                (date, time)
            }
            None => (epoch, midnight),
        }
    }
    rows.sort_by_key(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(home: &str, date: Option<NaiveDate>, time: &str) -> MatchRow {
        MatchRow {
            season: "2025".to_string(),
            round: Some("Round 1".to_string()),
            date,
            time: Some(time.to_string()),
            home: home.to_string(),
            away: "Leeds Rhinos".to_string(),
            home_goals: Some(18),
            away_goals: Some(6),
            ht_home_goals: Some(10),
            ht_away_goals: None,
            venue: None,
            status: None,
        }
    }

    #[test]
    fn test_csv_header_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rows = vec![row("Hull FC", NaiveDate::from_ymd_opt(2025, 2, 14), "20:00")];

        write_csv(&path, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Season,Round,Date,Time,Home,Away,HG,AG,HTHG,HTAG,Venue")
        );
        assert_eq!(
            lines.next(),
            Some("2025,Round 1,14.02.2025,20:00,Hull FC,Leeds Rhinos,18,6,10,,")
        );
    }

    #[test]
    fn test_read_back_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let rows = vec![
            row("Hull FC", NaiveDate::from_ymd_opt(2025, 2, 14), "20:00"),
            row("Castleford Tigers", None, "15:00"),
        ];
        write_csv(&path, &rows).unwrap();

        let read = read_csv(&path).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn test_sort_rows_puts_undated_first() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 3, day);
        let mut rows = vec![
            row("B", d(8), "15:00"),
            row("A", d(8), "13:00"),
            row("C", None, "19:45"),
            row("D", d(1), "20:00"),
        ];
        sort_rows(&mut rows);
        let order: Vec<_> = rows.iter().map(|r| r.home.as_str()).collect();
        assert_eq!(order, vec!["C", "D", "A", "B"]);
    }
}
