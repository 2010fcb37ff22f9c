//! Web scrapers for rugby match data

pub mod dates;
pub mod livesport;
pub mod world_rugby;

use crate::{DataSource, MatchRow, Result, SosError};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Trait for all data scrapers
pub trait Scraper {
    /// The data source this scraper fetches from
    fn source(&self) -> DataSource;

    /// Fetch every match row the scraper is configured for
    fn scrape(&self) -> Result<Vec<MatchRow>>;
}

/// Retry a scraper operation with exponential backoff
pub fn with_retry<T, F>(mut operation: F, max_attempts: u32) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < max_attempts => {
                log::warn!("Attempt {} failed: {}", attempt + 1, e);
                let delay = std::time::Duration::from_millis(100 * 2u64.pow(attempt));
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                log::warn!("Attempt {} failed, giving up: {}", attempt + 1, e);
                return Err(e);
            }
        }
    }
}

/// Merge rows from several pages, keyed on date and teams.
/// A completed row replaces a fixture; missing fields are filled in.
/// Undated rows cannot be matched up and pass through unchanged.
pub fn merge_rows(batches: Vec<Vec<MatchRow>>) -> Vec<MatchRow> {
    let mut merged: Vec<MatchRow> = Vec::new();
    let mut positions: HashMap<(NaiveDate, String, String), usize> = HashMap::new();

    for rows in batches {
        for row in rows {
            let Some(date) = row.date else {
                merged.push(row);
                continue;
            };
            let key = (date, row.home.to_lowercase(), row.away.to_lowercase());

            match positions.get(&key) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    if row.is_completed() && !existing.is_completed() {
                        existing.home_goals = row.home_goals;
                        existing.away_goals = row.away_goals;
                        existing.status = row.status.clone().or(existing.status.take());
                    }
                    if existing.ht_home_goals.is_none() && existing.ht_away_goals.is_none() {
                        existing.ht_home_goals = row.ht_home_goals;
                        existing.ht_away_goals = row.ht_away_goals;
                    }
                    if existing.venue.is_none() {
                        existing.venue = row.venue;
                    }
                    if existing.round.is_none() {
                        existing.round = row.round;
                    }
                    if existing.time.is_none() {
                        existing.time = row.time;
                    }
                }
                None => {
                    positions.insert(key, merged.len());
                    merged.push(row);
                }
            }
        }
    }

    merged
}

/// Scraper error for a source
pub(crate) fn scraper_error(data_source: DataSource, message: impl Into<String>) -> SosError {
    SosError::Scraper {
        data_source,
        message: message.into(),
    }
}
