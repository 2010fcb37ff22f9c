//! Rugby strength-of-schedule modelling
//!
//! Scrapes match results into flat rows and fits Poisson models of points
//! scored to estimate team attack, defence and home advantage.

pub mod data;
pub mod model;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Source of match data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Livesport,
    WorldRugby,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Livesport => write!(f, "Livesport"),
            DataSource::WorldRugby => write!(f, "World Rugby"),
        }
    }
}

/// Venue relation of a team-perspective result row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    /// The scoring team played at home
    OffenseHome,
    /// The opponent played at home
    DefenseHome,
    Neutral,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::OffenseHome => "offense_home",
            Field::DefenseHome => "defense_home",
            Field::Neutral => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "offense_home" | "home" => Some(Field::OffenseHome),
            "defense_home" | "away" => Some(Field::DefenseHome),
            "none" | "neutral" | "" => Some(Field::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `results` table, seen from `team`'s side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub game_id: String,
    pub year: i32,
    pub field: Field,
    pub team: String,
    pub opponent: String,
    pub team_score: u32,
}

/// A result row prepared for model fitting
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub game_id: String,
    pub year: i32,
    pub field: Field,
    pub team: String,
    pub opponent: String,
    pub score: f64,
    /// Frequency weight, `year - reference_year`
    pub weight: f64,
}

/// Whether a model term is a fixed or random effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Fixed,
    Random,
}

impl EffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectKind::Fixed => "fixed",
            EffectKind::Random => "random",
        }
    }
}

impl FromStr for EffectKind {
    type Err = SosError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(EffectKind::Fixed),
            "random" => Ok(EffectKind::Random),
            other => Err(SosError::Parse(format!("unknown effect type: {}", other))),
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fitted coefficient, a row of `_basic_factors`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorEstimate {
    pub factor: String,
    #[serde(rename = "type")]
    pub kind: EffectKind,
    pub level: String,
    pub estimate: f64,
}

/// One level of a categorical model term, a row of `_parameter_levels`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLevel {
    pub parameter: String,
    #[serde(rename = "type")]
    pub kind: EffectKind,
    pub level: String,
}

/// A scraped match, the unit of the CSV output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchRow {
    pub season: String,
    pub round: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub home: String,
    pub away: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub ht_home_goals: Option<u32>,
    pub ht_away_goals: Option<u32>,
    pub venue: Option<String>,
    /// Result qualifier such as "AET" or "PEN"
    pub status: Option<String>,
}

impl MatchRow {
    /// Both final scores are known
    pub fn is_completed(&self) -> bool {
        self.home_goals.is_some() && self.away_goals.is_some()
    }

    /// Season year, falling back to the match date
    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.season
            .trim()
            .parse()
            .ok()
            .or_else(|| self.date.map(|d| d.year()))
    }

    /// Stable identifier derived from season, date (or round when undated) and teams
    pub fn game_id(&self) -> String {
        let slug = |s: &str| {
            s.trim()
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect::<String>()
        };
        let when = match (self.date, self.round.as_deref()) {
            (Some(d), _) => d.format("%Y%m%d").to_string(),
            (None, Some(round)) if !round.trim().is_empty() => format!("nodate-{}", slug(round)),
            _ => "nodate".to_string(),
        };
        format!("{}-{}-{}-{}", self.season.trim(), when, slug(&self.home), slug(&self.away))
    }

    /// Game ids for a batch of rows; repeated ids get a `-2`, `-3`, ... suffix
    pub fn unique_game_ids(rows: &[MatchRow]) -> Vec<String> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        rows.iter()
            .map(|row| {
                let id = row.game_id();
                let count = seen.entry(id.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    id
                } else {
                    format!("{}-{}", id, count)
                }
            })
            .collect()
    }

    /// Expand a completed match into its home and away result rows
    pub fn result_rows(&self, game_id: &str) -> Option<[ResultRow; 2]> {
        let (home_goals, away_goals) = (self.home_goals?, self.away_goals?);
        let year = self.year()?;
        Some([
            ResultRow {
                game_id: game_id.to_string(),
                year,
                field: Field::OffenseHome,
                team: self.home.clone(),
                opponent: self.away.clone(),
                team_score: home_goals,
            },
            ResultRow {
                game_id: game_id.to_string(),
                year,
                field: Field::DefenseHome,
                team: self.away.clone(),
                opponent: self.home.clone(),
                team_score: away_goals,
            },
        ])
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum SosError {
    #[error("Scraper failed for {data_source}: {message}")]
    Scraper {
        data_source: DataSource,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model fitting failed: {0}")]
    Model(String),

    #[error("No data: {0}")]
    NoData(String),
}

pub type Result<T> = std::result::Result<T, SosError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub scrape: ScrapeConfig,
    pub world_rugby: WorldRugbyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
    pub diagnostics_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: model::ModelKind,
    pub min_year: i32,
    pub max_year: i32,
    pub reference_year: i32,
    pub include_game_effect: bool,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Variance-component iterations for the mixed model
    pub max_outer_iterations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub results_url: String,
    pub fixtures_url: String,
    pub season: String,
    pub cache_dir: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub output_csv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldRugbyConfig {
    pub base_url: String,
    pub rankings_url: String,
    pub page_size: u32,
    pub max_attempts: u32,
    pub output_dir: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            kind: model::ModelKind::Glmm,
            min_year: 2024,
            max_year: 2025,
            reference_year: 2023,
            include_game_effect: true,
            max_iterations: 50,
            tolerance: 1e-8,
            max_outer_iterations: 100,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                database_path: "data/nrl.db".to_string(),
                diagnostics_dir: "diagnostics".to_string(),
            },
            model: ModelConfig::default(),
            scrape: ScrapeConfig {
                results_url:
                    "https://www.livesport.com/en/rugby-league/england/super-league/results/"
                        .to_string(),
                fixtures_url:
                    "https://www.livesport.com/en/rugby-league/england/super-league/fixtures/"
                        .to_string(),
                season: "2025".to_string(),
                cache_dir: Some("cache".to_string()),
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
                timeout_secs: 30,
                output_csv: "super_league_data.csv".to_string(),
            },
            world_rugby: WorldRugbyConfig {
                base_url: "http://cmsapi.pulselive.com".to_string(),
                rankings_url: "https://api.wr-rims-prod.pulselive.com/rugby/v3/rankings/mru?language=en"
                    .to_string(),
                page_size: 100,
                max_attempts: 5,
                output_dir: "world_rugby".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SosError::Config(format!("Failed to read config file {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| SosError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SosError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
