//! Livesport results and fixtures scraper
//!
//! Parses the rendered listing markup: a flat run of sibling `div`s where
//! round/date headers precede the `event__match` rows they apply to.
//! The listing is built client-side, so live fetches only work when the
//! server returns rendered markup; otherwise save the rendered page and use
//! [`LivesportScraper::parse_files`].

use super::dates::{normalize_date, parse_time_cell};
use super::{merge_rows, Scraper};
use crate::data::export::sort_rows;
use crate::{DataSource, MatchRow, Result, ScrapeConfig, SosError};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Status words that mark a finished match on a fixtures listing
const COMPLETED_STATUSES: [&str; 4] = ["FT", "FINISHED", "AET", "ENDED"];

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn period_score() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+)\s*-\s*(\d+)\)").expect("static regex"))
}

/// Whitespace-normalised text content of an element
fn text_of(element: &ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_goals(text: &str) -> Option<u32> {
    let text = text.trim();
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

/// Find a "(h - a)" pair in free text
fn parse_period_pair(text: &str) -> Option<(u32, u32)> {
    let caps = period_score().captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Cut "Round 15 results" down to "Round 15"
fn clean_round_label(label: &str) -> String {
    let lower = label.to_lowercase();
    if lower.contains(" results") || lower.contains(" fixtures") {
        label.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
    } else {
        label.trim().to_string()
    }
}

/// Parser for the listing markup
pub struct LivesportParser {
    season: String,
    season_year: i32,
    today: NaiveDate,
    match_row: Selector,
    date_header: Selector,
    round_header: Selector,
    header_text: Selector,
    span: Selector,
    time: Selector,
    home: Selector,
    away: Selector,
    home_score: Selector,
    away_score: Selector,
    half_time_part: Selector,
    first_half_home: Selector,
    first_half_away: Selector,
    period_parts: Selector,
}

impl LivesportParser {
    pub fn new(season: &str, today: NaiveDate) -> Self {
        let season_year = season.trim().parse().unwrap_or_else(|_| today.year());
        LivesportParser {
            season: season.trim().to_string(),
            season_year,
            today,
            match_row: selector("div[class*='event__match']"),
            date_header: selector("div[class*='event__header--Date'], div.event__header[class*='--Date']"),
            round_header: selector("div[class*='event__round']"),
            header_text: selector(".event__title--name, .event__title--date"),
            span: selector("span"),
            time: selector("div[class*='event__time']"),
            home: selector("div[class*='event__participant--home']"),
            away: selector("div[class*='event__participant--away']"),
            home_score: selector("[class*='event__score--home']"),
            away_score: selector("[class*='event__score--away']"),
            half_time_part: selector("[class*='event__part--HT']"),
            first_half_home: selector(".event__part--home.event__part--1"),
            first_half_away: selector(".event__part--away.event__part--1"),
            period_parts: selector("[class*='event__part--'], div[class*='subscore__item']"),
        }
    }

    /// Parse every match row on a listing page
    pub fn parse(&self, html: &str, is_results_page: bool) -> Vec<MatchRow> {
        let document = Html::parse_document(html);
        let elements: Vec<_> = document.select(&self.match_row).collect();
        log::debug!("Found {} candidate match rows", elements.len());

        let mut rows = Vec::new();
        for (idx, element) in elements.iter().enumerate() {
            match self.parse_match(element, is_results_page) {
                Some(row) => rows.push(row),
                None => log::debug!("Skipping match row {}: no home team", idx),
            }
        }

        log::info!(
            "Parsed {} matches from {} page",
            rows.len(),
            if is_results_page { "results" } else { "fixtures" }
        );
        rows
    }

    fn parse_match(&self, element: &ElementRef, is_results_page: bool) -> Option<MatchRow> {
        let home = element
            .select(&self.home)
            .next()
            .map(|e| text_of(&e))
            .filter(|s| !s.is_empty())?;
        let away = element
            .select(&self.away)
            .next()
            .map(|e| text_of(&e))
            .unwrap_or_default();

        let cell = element
            .select(&self.time)
            .next()
            .map(|e| parse_time_cell(&text_of(&e)))
            .unwrap_or_default();

        let header_date = self.preceding_header(element, &self.date_header);
        let date = cell.date_in(self.season_year).or_else(|| {
            header_date
                .as_deref()
                .and_then(|h| normalize_date(h, self.season_year, self.today))
        });
        if date.is_none() {
            log::warn!(
                "Could not resolve a date for {} v {} (header: {:?})",
                home,
                away,
                header_date
            );
        }

        let round = self
            .preceding_header(element, &self.round_header)
            .map(|r| clean_round_label(&r));

        let mut row = MatchRow {
            season: self.season.clone(),
            round,
            date,
            time: cell.time_string(),
            home,
            away,
            status: cell.status.clone(),
            ..Default::default()
        };

        let finished = cell
            .status
            .as_deref()
            .map(|s| COMPLETED_STATUSES.contains(&s.to_uppercase().as_str()))
            .unwrap_or(false);

        if is_results_page || finished {
            row.home_goals = element
                .select(&self.home_score)
                .next()
                .and_then(|e| parse_goals(&text_of(&e)));
            row.away_goals = element
                .select(&self.away_score)
                .next()
                .and_then(|e| parse_goals(&text_of(&e)));

            if let Some((h, a)) = self.half_time(element) {
                row.ht_home_goals = Some(h);
                row.ht_away_goals = Some(a);
            }
        }

        Some(row)
    }

    /// Half-time score, trying the known markups in order
    fn half_time(&self, element: &ElementRef) -> Option<(u32, u32)> {
        // Explicit half-time element
        if let Some(pair) = element
            .select(&self.half_time_part)
            .find_map(|e| parse_period_pair(&text_of(&e)))
        {
            return Some(pair);
        }

        // First-half cells for each side
        let home = element
            .select(&self.first_half_home)
            .next()
            .and_then(|e| parse_goals(&text_of(&e)));
        let away = element
            .select(&self.first_half_away)
            .next()
            .and_then(|e| parse_goals(&text_of(&e)));
        if let (Some(h), Some(a)) = (home, away) {
            return Some((h, a));
        }

        let parts: Vec<String> = element
            .select(&self.period_parts)
            .map(|e| text_of(&e))
            .collect();

        // A period labelled as the first half
        let labelled = parts.iter().find_map(|text| {
            let lower = text.to_lowercase();
            let is_first_half = lower.contains("1st half")
                || lower.contains("half-time")
                || lower.trim_matches(|c: char| c == '(' || c == ')' || c == ' ') == "ht";
            if is_first_half {
                parse_period_pair(text)
            } else {
                None
            }
        });
        if labelled.is_some() {
            return labelled;
        }

        // Otherwise the first parenthesised pair
        parts.iter().find_map(|text| parse_period_pair(text))
    }

    /// Text of the closest preceding sibling header matching `header`
    fn preceding_header(&self, element: &ElementRef, header: &Selector) -> Option<String> {
        for node in element.prev_siblings() {
            let Some(sibling) = ElementRef::wrap(node) else {
                continue;
            };
            let is_header = header.matches(&sibling) || sibling.select(header).next().is_some();
            if !is_header {
                continue;
            }
            let text = sibling
                .select(&self.header_text)
                .next()
                .or_else(|| sibling.select(&self.span).next())
                .map(|e| text_of(&e))
                .unwrap_or_else(|| text_of(&sibling));
            if !text.is_empty() {
                return Some(text);
            }
        }
        None
    }
}

/// Scraper for livesport listing pages
pub struct LivesportScraper {
    client: reqwest::blocking::Client,
    parser: LivesportParser,
    results_url: String,
    fixtures_url: String,
    /// Optional cache directory for rendered HTML
    cache_dir: Option<PathBuf>,
    /// If true, only use cache (no network requests)
    offline_only: bool,
}

impl LivesportScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        let today = chrono::Local::now().date_naive();

        Ok(LivesportScraper {
            client,
            parser: LivesportParser::new(&config.season, today),
            results_url: config.results_url.clone(),
            fixtures_url: config.fixtures_url.clone(),
            cache_dir: config.cache_dir.as_ref().map(PathBuf::from),
            offline_only: false,
        })
    }

    /// Create scraper with a cache directory
    pub fn with_cache<P: AsRef<Path>>(mut self, cache_dir: P) -> Self {
        self.cache_dir = Some(cache_dir.as_ref().to_path_buf());
        self
    }

    /// Set offline-only mode (no network requests, cache must exist)
    pub fn offline_only(mut self, offline: bool) -> Self {
        self.offline_only = offline;
        self
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            let filename = url
                .trim_end_matches('/')
                .replace("https://", "")
                .replace("http://", "")
                .replace(['/', '?'], "_")
                + ".html";
            dir.join(filename)
        })
    }

    fn load_from_cache(&self, url: &str) -> Option<String> {
        let path = self.cache_path(url)?;
        if path.exists() {
            log::debug!("Loading from cache: {}", path.display());
            std::fs::read_to_string(&path).ok()
        } else {
            None
        }
    }

    fn save_to_cache(&self, url: &str, html: &str) -> Result<()> {
        if let Some(path) = self.cache_path(url) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, html)?;
            log::debug!("Saved to cache: {}", path.display());
        }
        Ok(())
    }

    /// Fetch a page, preferring the cache
    fn fetch_page(&self, url: &str) -> Result<String> {
        if let Some(html) = self.load_from_cache(url) {
            return Ok(html);
        }

        if self.offline_only {
            return Err(SosError::Scraper {
                data_source: DataSource::Livesport,
                message: format!("No cached data for {} (offline mode)", url),
            });
        }

        log::info!("Fetching {}", url);
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(SosError::Scraper {
                data_source: DataSource::Livesport,
                message: format!("HTTP {}: {}", response.status(), url),
            });
        }

        let html = response.text()?;
        if let Err(e) = self.save_to_cache(url, &html) {
            log::warn!("Failed to cache {}: {}", url, e);
        }
        Ok(html)
    }

    pub fn fetch_results(&self) -> Result<Vec<MatchRow>> {
        let html = self.fetch_page(&self.results_url)?;
        Ok(self.parser.parse(&html, true))
    }

    pub fn fetch_fixtures(&self) -> Result<Vec<MatchRow>> {
        let html = self.fetch_page(&self.fixtures_url)?;
        Ok(self.parser.parse(&html, false))
    }

    /// Results and fixtures merged and sorted by kickoff
    pub fn scrape_all(&self) -> Result<Vec<MatchRow>> {
        let results = self.fetch_results()?;
        let fixtures = match self.fetch_fixtures() {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Failed to fetch fixtures: {}", e);
                vec![]
            }
        };

        let mut rows = merge_rows(vec![results, fixtures]);
        sort_rows(&mut rows);
        Ok(rows)
    }

    /// Parse a saved HTML page
    pub fn parse_file<P: AsRef<Path>>(&self, path: P, is_results_page: bool) -> Result<Vec<MatchRow>> {
        let html = std::fs::read_to_string(path.as_ref())?;
        Ok(self.parser.parse(&html, is_results_page))
    }

    /// Parse several saved pages, skipping unreadable ones
    pub fn parse_files<P: AsRef<Path>>(&self, paths: &[P], is_results_page: bool) -> Vec<MatchRow> {
        let mut batches = Vec::new();
        for path in paths {
            let path = path.as_ref();
            log::info!("Parsing {}", path.display());
            match self.parse_file(path, is_results_page) {
                Ok(rows) => batches.push(rows),
                Err(e) => log::warn!("Failed to parse {}: {}", path.display(), e),
            }
        }
        let mut rows = merge_rows(batches);
        sort_rows(&mut rows);
        rows
    }
}

impl Scraper for LivesportScraper {
    fn source(&self) -> DataSource {
        DataSource::Livesport
    }

    fn scrape(&self) -> Result<Vec<MatchRow>> {
        self.scrape_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
        <html><body><div class="sportName rugby-league">
          <div class="event__round event__round--static">Round 12 results</div>
          <div class="event__match event__match--static event__match--twoLine">
            <div class="event__time">14.05. 19:45</div>
            <div class="event__participant event__participant--home">Wigan Warriors</div>
            <div class="event__participant event__participant--away">St Helens</div>
            <span class="event__score event__score--home">24</span>
            <span class="event__score event__score--away">12</span>
            <div class="event__part event__part--HT">(10 - 6)</div>
          </div>
          <div class="event__match event__match--static">
            <div class="event__time">15.05. 20:00AET</div>
            <div class="event__participant event__participant--home">Hull FC</div>
            <div class="event__participant event__participant--away">Leeds Rhinos</div>
            <span class="event__score event__score--home">19</span>
            <span class="event__score event__score--away">18</span>
            <div class="event__part event__part--home event__part--1">8</div>
            <div class="event__part event__part--away event__part--1">12</div>
          </div>
          <div class="event__round event__round--static">Round 11 results</div>
          <div class="event__match event__match--static">
            <div class="event__time">08.05. 15:00</div>
            <div class="event__participant event__participant--home">Catalans Dragons</div>
            <div class="event__participant event__participant--away">Warrington Wolves</div>
            <span class="event__score event__score--home">-</span>
            <span class="event__score event__score--away">-</span>
          </div>
          <div class="event__match event__match--static">
            <div class="event__time">09.05. 15:00</div>
            <div class="event__participant event__participant--away">Nobody</div>
          </div>
        </div></body></html>
    "#;

    const FIXTURES_PAGE: &str = r#"
        <html><body><div class="sportName rugby-league">
          <div class="event__header event__header--Date"><span>SAT, 17 May</span></div>
          <div class="event__round">Round 13 fixtures</div>
          <div class="event__match event__match--scheduled">
            <div class="event__time">15:00</div>
            <div class="event__participant event__participant--home">Leigh Leopards</div>
            <div class="event__participant event__participant--away">Salford Red Devils</div>
          </div>
          <div class="event__match event__match--scheduled">
            <div class="event__time">FT</div>
            <div class="event__participant event__participant--home">Huddersfield Giants</div>
            <div class="event__participant event__participant--away">Castleford Tigers</div>
            <div class="event__score event__score--home">30</div>
            <div class="event__score event__score--away">4</div>
            <div class="event__part event__part--home">(1st half 12 - 0)</div>
            <div class="event__part event__part--home">1st half (12 - 0)</div>
          </div>
        </div></body></html>
    "#;

    fn parser() -> LivesportParser {
        LivesportParser::new("2025", NaiveDate::from_ymd_opt(2025, 5, 16).unwrap())
    }

    #[test]
    fn test_results_rows() {
        let rows = parser().parse(RESULTS_PAGE, true);
        assert_eq!(rows.len(), 3);

        let first = &rows[0];
        assert_eq!(first.home, "Wigan Warriors");
        assert_eq!(first.away, "St Helens");
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2025, 5, 14));
        assert_eq!(first.time.as_deref(), Some("19:45"));
        assert_eq!(first.round.as_deref(), Some("Round 12"));
        assert_eq!((first.home_goals, first.away_goals), (Some(24), Some(12)));
        assert_eq!((first.ht_home_goals, first.ht_away_goals), (Some(10), Some(6)));
    }

    #[test]
    fn test_status_suffix_and_half_cells() {
        let rows = parser().parse(RESULTS_PAGE, true);
        let hull = &rows[1];
        assert_eq!(hull.status.as_deref(), Some("AET"));
        assert_eq!(hull.round.as_deref(), Some("Round 12"));
        assert_eq!((hull.ht_home_goals, hull.ht_away_goals), (Some(8), Some(12)));
    }

    #[test]
    fn test_placeholder_scores_are_missing() {
        let rows = parser().parse(RESULTS_PAGE, true);
        let catalans = &rows[2];
        assert_eq!(catalans.round.as_deref(), Some("Round 11"));
        assert!(!catalans.is_completed());
        assert_eq!(catalans.ht_home_goals, None);
    }

    #[test]
    fn test_fixtures_use_header_date() {
        let rows = parser().parse(FIXTURES_PAGE, false);
        assert_eq!(rows.len(), 2);

        let leigh = &rows[0];
        assert_eq!(leigh.date, NaiveDate::from_ymd_opt(2025, 5, 17));
        assert_eq!(leigh.round.as_deref(), Some("Round 13"));
        assert!(!leigh.is_completed());

        let giants = &rows[1];
        assert_eq!(giants.status.as_deref(), Some("FT"));
        assert_eq!((giants.home_goals, giants.away_goals), (Some(30), Some(4)));
        assert_eq!((giants.ht_home_goals, giants.ht_away_goals), (Some(12), Some(0)));
    }

    #[test]
    fn test_fixture_scores_ignored_without_status() {
        let html = r#"
            <div class="event__match">
              <div class="event__time">19:45</div>
              <div class="event__participant--home">A</div>
              <div class="event__participant--away">B</div>
              <div class="event__score--home">1</div>
              <div class="event__score--away">2</div>
            </div>"#;
        let rows = parser().parse(html, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].home_goals, None);
        assert_eq!(rows[0].date, None);
    }

    #[test]
    fn test_parse_files_and_cache_path() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("results.html");
        std::fs::write(&page, RESULTS_PAGE).unwrap();

        let config = crate::Config::default().scrape;
        let scraper = LivesportScraper::new(&config)
            .unwrap()
            .with_cache(dir.path())
            .offline_only(true);

        let rows = scraper.parse_files(&[page.clone(), dir.path().join("missing.html")], true);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].home, "Catalans Dragons");

        let cached = scraper.cache_path("https://www.livesport.com/en/results/").unwrap();
        assert_eq!(cached, dir.path().join("www.livesport.com_en_results.html"));

        // Offline with an empty cache is an error
        assert!(scraper.fetch_fixtures().is_err());
    }

    #[test]
    fn test_clean_round_label() {
        assert_eq!(clean_round_label("Round 15 results"), "Round 15");
        assert_eq!(clean_round_label("Magic Weekend"), "Magic Weekend");
    }
}
