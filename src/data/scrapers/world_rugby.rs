//! World Rugby (pulselive) match API scraper
//!
//! The API pages through a year's matches with `pageSize`/`page` and reports
//! the page count in `pageInfo.numPages`. Nested fields are frequently
//! absent, so every field is optional. Lists may also arrive as `null`.

use super::{scraper_error, with_retry, Scraper};
use crate::data::export::write_csv;
use crate::{DataSource, MatchRow, Result, ScrapeConfig, WorldRugbyConfig};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Page size used when paging the country list
const COUNTRY_PAGE_SIZE: u32 = 100;

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub page: u32,
    pub num_pages: u32,
    pub page_size: u32,
    pub num_entries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Venue {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchTime {
    pub millis: Option<i64>,
    /// Hours from GMT at the venue
    pub gmt_offset: Option<f64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamRef {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub abbreviation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Stamp {
    pub millis: Option<i64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub id: Option<i64>,
    pub label: Option<String>,
    pub sport: Option<String>,
    pub start: Option<Stamp>,
    pub end: Option<Stamp>,
}

/// One match from the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldRugbyMatch {
    pub match_id: Option<i64>,
    pub description: Option<String>,
    pub event_phase: Option<String>,
    pub venue: Option<Venue>,
    pub time: Option<MatchTime>,
    pub attendance: Option<i64>,
    #[serde(deserialize_with = "null_as_empty")]
    pub teams: Vec<TeamRef>,
    #[serde(deserialize_with = "null_as_empty")]
    pub scores: Vec<Option<u32>>,
    /// "C" once complete
    pub status: Option<String>,
    pub outcome: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub events: Vec<Event>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// Header of the flat per-year CSV
pub const FLAT_HEADER: [&str; 28] = [
    "match_id",
    "description",
    "venue_id",
    "venue_name",
    "venue_city",
    "venue_country",
    "time_millis",
    "time_gmt_offset",
    "time_label",
    "attendance",
    "team_id",
    "team_name",
    "team_abbr",
    "opponent_id",
    "opponent_name",
    "opponent_abbr",
    "team_score",
    "opponent_score",
    "status",
    "outcome",
    "event_id",
    "event_label",
    "event_sport",
    "event_start_millis",
    "event_start_label",
    "event_end_millis",
    "event_end_label",
    "json",
];

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl WorldRugbyMatch {
    /// Deserialize a match, keeping the raw JSON alongside
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let mut m: WorldRugbyMatch = serde_json::from_value(value.clone())?;
        m.raw = value;
        Ok(m)
    }

    fn team(&self, idx: usize) -> Option<&TeamRef> {
        self.teams.get(idx)
    }

    fn score(&self, idx: usize) -> Option<u32> {
        self.scores.get(idx).copied().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.status.as_deref() == Some("C")
    }

    /// Kickoff in venue-local time
    pub fn local_kickoff(&self) -> Option<NaiveDateTime> {
        let time = self.time.as_ref()?;
        let millis = time.millis?;
        let offset_millis = (time.gmt_offset.unwrap_or(0.0) * 3_600_000.0).round() as i64;
        DateTime::from_timestamp_millis(millis + offset_millis).map(|dt| dt.naive_utc())
    }

    /// One row of the flat per-year CSV
    pub fn flat_record(&self) -> Vec<String> {
        let venue = self.venue.clone().unwrap_or_default();
        let time = self.time.clone().unwrap_or_default();
        let team = self.team(0).cloned().unwrap_or_default();
        let opponent = self.team(1).cloned().unwrap_or_default();
        let event = self.events.first().cloned().unwrap_or_default();
        let start = event.start.clone().unwrap_or_default();
        let end = event.end.clone().unwrap_or_default();

        vec![
            cell(self.match_id),
            cell(self.description.clone()),
            cell(venue.id),
            cell(venue.name),
            cell(venue.city),
            cell(venue.country),
            cell(time.millis),
            cell(time.gmt_offset),
            cell(time.label),
            cell(self.attendance),
            cell(team.id),
            cell(team.name),
            cell(team.abbreviation),
            cell(opponent.id),
            cell(opponent.name),
            cell(opponent.abbreviation),
            cell(self.score(0)),
            cell(self.score(1)),
            cell(self.status.clone()),
            cell(self.outcome.clone()),
            cell(event.id),
            cell(event.label),
            cell(event.sport),
            cell(start.millis),
            cell(start.label),
            cell(end.millis),
            cell(end.label),
            self.raw.to_string(),
        ]
    }

    /// Convert to the shared match row; scores only for completed matches
    pub fn to_match_row(&self) -> Option<MatchRow> {
        let home = self.team(0)?.name.clone()?;
        let away = self.team(1)?.name.clone()?;
        let kickoff = self.local_kickoff();
        let complete = self.is_complete();

        Some(MatchRow {
            season: kickoff
                .map(|k| k.format("%Y").to_string())
                .unwrap_or_default(),
            round: self.event_phase.clone().or_else(|| self.description.clone()),
            date: kickoff.map(|k| k.date()),
            time: kickoff.map(|k| k.format("%H:%M").to_string()),
            home,
            away,
            home_goals: if complete { self.score(0) } else { None },
            away_goals: if complete { self.score(1) } else { None },
            ht_home_goals: None,
            ht_away_goals: None,
            venue: self.venue.as_ref().and_then(|v| v.name.clone()),
            status: self.status.clone(),
        })
    }
}

/// Parse one page of the match API
pub fn parse_match_page(json: &str) -> Result<(PageInfo, Vec<WorldRugbyMatch>)> {
    let value: serde_json::Value = serde_json::from_str(json)?;

    let page_info = match value.get("pageInfo") {
        Some(info) => serde_json::from_value(info.clone())?,
        None => PageInfo::default(),
    };

    let mut matches = Vec::new();
    if let Some(content) = value.get("content").and_then(|c| c.as_array()) {
        for (i, item) in content.iter().enumerate() {
            match WorldRugbyMatch::from_value(item.clone()) {
                Ok(m) => matches.push(m),
                Err(e) => log::warn!("Skipping match {} on page {}: {}", i, page_info.page, e),
            }
        }
    }

    Ok((page_info, matches))
}

/// One country from the country API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Country {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub teams: serde_json::Value,
}

impl Country {
    /// `id, name, teams-json` row of `countries.csv`
    pub fn record(&self) -> Vec<String> {
        let teams = if self.teams.is_null() {
            "null".to_string()
        } else {
            self.teams.to_string()
        };
        vec![cell(self.id), cell(self.name.clone()), teams]
    }
}

/// `content` of a country API page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CountryContent {
    #[serde(deserialize_with = "null_as_empty")]
    pub countries: Vec<Country>,
    #[serde(deserialize_with = "null_as_empty")]
    pub sport_lookup: Vec<serde_json::Value>,
    #[serde(deserialize_with = "null_as_empty")]
    pub type_lookup: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CountryPage {
    page_info: PageInfo,
    content: CountryContent,
}

/// Parse one page of the country API
pub fn parse_country_page(json: &str) -> Result<(PageInfo, CountryContent)> {
    let page: CountryPage = serde_json::from_str(json)?;
    Ok((page.page_info, page.content))
}

/// Cells of a lookup entry: arrays cell by cell, objects by value
fn lookup_record(entry: &serde_json::Value) -> Vec<String> {
    fn scalar(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match entry {
        serde_json::Value::Array(items) => items.iter().map(scalar).collect(),
        serde_json::Value::Object(map) => map.values().map(scalar).collect(),
        other => vec![scalar(other)],
    }
}

/// Write lookup entries as header-less CSV rows of varying width
pub fn write_lookup_csv<P: AsRef<Path>>(path: P, entries: &[serde_json::Value]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path.as_ref())?;
    for entry in entries {
        writer.write_record(lookup_record(entry))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `id, name, teams-json` rows without a header
pub fn write_countries_csv<P: AsRef<Path>>(path: P, countries: &[Country]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;
    for country in countries {
        writer.write_record(country.record())?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a year's matches as `matches_<year>.csv` in the flat layout and
/// `results_<year>.csv` in the match-row layout that `data import` reads
pub fn write_year_files<P: AsRef<Path>>(
    dir: P,
    year: i32,
    matches: &[WorldRugbyMatch],
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let flat = dir.join(format!("matches_{}.csv", year));
    write_flat_csv(&flat, matches)?;

    let rows: Vec<MatchRow> = matches
        .iter()
        .filter_map(WorldRugbyMatch::to_match_row)
        .collect();
    let results = dir.join(format!("results_{}.csv", year));
    write_csv(&results, &rows)?;

    Ok(vec![flat, results])
}

/// Scraper for the World Rugby match API
pub struct WorldRugbyScraper {
    client: reqwest::blocking::Client,
    base_url: String,
    rankings_url: String,
    page_size: u32,
    max_attempts: u32,
    first_year: i32,
    last_year: i32,
}

impl WorldRugbyScraper {
    pub fn new(
        config: &WorldRugbyConfig,
        scrape: &ScrapeConfig,
        first_year: i32,
        last_year: i32,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(scrape.user_agent.clone())
            .timeout(std::time::Duration::from_secs(scrape.timeout_secs))
            .build()?;

        Ok(WorldRugbyScraper {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rankings_url: config.rankings_url.clone(),
            page_size: config.page_size.max(1),
            max_attempts: config.max_attempts,
            first_year,
            last_year: last_year.max(first_year),
        })
    }

    pub fn match_url(&self, year: i32, page: u32) -> String {
        format!(
            "{}/rugby/match.json?startDate={}-01-01&endDate={}-12-31&sort=asc&pageSize={}&page={}",
            self.base_url, year, year, self.page_size, page
        )
    }

    pub fn country_url(&self, page_size: u32, page: u32) -> String {
        format!(
            "{}/rugby/country.json?pageSize={}&page={}",
            self.base_url, page_size, page
        )
    }

    fn get_text(&self, url: &str) -> Result<String> {
        with_retry(
            || {
                let response = self.client.get(url).send()?;
                if !response.status().is_success() {
                    return Err(scraper_error(
                        DataSource::WorldRugby,
                        format!("HTTP {}: {}", response.status(), url),
                    ));
                }
                Ok(response.text()?)
            },
            self.max_attempts,
        )
    }

    /// Fetch every page of a year's matches
    pub fn fetch_year(&self, year: i32) -> Result<Vec<WorldRugbyMatch>> {
        let mut all = Vec::new();
        let mut page = 0;

        loop {
            let url = self.match_url(year, page);
            log::debug!("Fetching {}", url);
            let (info, matches) = parse_match_page(&self.get_text(&url)?)?;
            all.extend(matches);

            page += 1;
            if page >= info.num_pages {
                break;
            }
        }

        log::info!("Matches for year {}: {}", year, all.len());
        Ok(all)
    }

    /// Fetch each year in range and write its flat and match-row CSV files
    pub fn export_years<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let mut written = Vec::new();
        for year in self.first_year..=self.last_year {
            let matches = self.fetch_year(year)?;
            written.extend(write_year_files(dir, year, &matches)?);
        }
        Ok(written)
    }

    /// Fetch the country list into `countries.csv`, with the sport and type
    /// lookups in `sports.csv` and `types.csv`
    pub fn fetch_countries<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        // One country per page, so numPages is the country count
        let (meta, lookups) = parse_country_page(&self.get_text(&self.country_url(1, 0))?)?;
        let sports = dir.join("sports.csv");
        write_lookup_csv(&sports, &lookups.sport_lookup)?;
        let types = dir.join("types.csv");
        write_lookup_csv(&types, &lookups.type_lookup)?;

        let pages = meta.num_pages.div_ceil(COUNTRY_PAGE_SIZE);
        let mut countries = Vec::new();
        for page in 0..pages {
            let url = self.country_url(COUNTRY_PAGE_SIZE, page);
            log::debug!("Fetching {}", url);
            let (_, content) = parse_country_page(&self.get_text(&url)?)?;
            countries.extend(content.countries);
        }
        log::info!("Countries: {}", countries.len());

        let path = dir.join("countries.csv");
        write_countries_csv(&path, &countries)?;
        Ok(vec![path, sports, types])
    }

    /// Download the rankings JSON to a file
    pub fn fetch_rankings<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = self.get_text(&self.rankings_url)?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), serde_json::to_string(&value)?)?;
        Ok(())
    }
}

impl Scraper for WorldRugbyScraper {
    fn source(&self) -> DataSource {
        DataSource::WorldRugby
    }

    fn scrape(&self) -> Result<Vec<MatchRow>> {
        let mut rows = Vec::new();
        for year in self.first_year..=self.last_year {
            rows.extend(
                self.fetch_year(year)?
                    .iter()
                    .filter_map(WorldRugbyMatch::to_match_row),
            );
        }
        Ok(rows)
    }
}

/// Write matches in the flat layout
pub fn write_flat_csv<P: AsRef<Path>>(path: P, matches: &[WorldRugbyMatch]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(FLAT_HEADER)?;
    for m in matches {
        writer.write_record(m.flat_record())?;
    }
    writer.flush()?;
    Ok(())
}
