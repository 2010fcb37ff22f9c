//! Rugby strength-of-schedule CLI
//!
//! Scrapes match results, stores team-perspective scores and fits Poisson
//! score models whose factor estimates feed team ratings.

use clap::{Parser, Subcommand};
use rugby_sos::model::ModelKind;
use rugby_sos::{Config, Result};

#[derive(Parser)]
#[command(name = "rugby-sos")]
#[command(about = "Rugby score models and match data scrapers", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Fit the score model and store its factor estimates
    Fit {
        /// Model kind (glm or glmm)
        #[arg(long)]
        kind: Option<ModelKind>,
        /// First season to include
        #[arg(long)]
        min_year: Option<i32>,
        /// Last season to include
        #[arg(long)]
        max_year: Option<i32>,
    },
    /// Show stored factor estimates
    Factors {
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
        /// Only show one factor
        #[arg(long)]
        factor: Option<String>,
    },
    /// Show team ratings from stored estimates
    Ratings {
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Scraper commands
    Scrape {
        #[command(subcommand)]
        action: ScrapeCommands,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Show database status
    Status,
    /// Import completed matches from a scraped CSV
    Import {
        /// CSV file in the scraper layout
        csv: String,
    },
}

#[derive(Subcommand)]
enum ScrapeCommands {
    /// Scrape livesport results and fixtures to CSV
    Live {
        /// Only fetch fixtures
        #[arg(long, conflicts_with = "results_only")]
        fixtures_only: bool,
        /// Only fetch results
        #[arg(long)]
        results_only: bool,
        /// Use only cached pages (no network requests)
        #[arg(long)]
        offline: bool,
        /// Output CSV path
        #[arg(long)]
        output: Option<String>,
    },
    /// Parse saved livesport pages
    Parse {
        /// HTML files
        #[arg(required = true)]
        files: Vec<String>,
        /// Treat pages as results listings
        #[arg(long)]
        results: bool,
        /// Output CSV path
        #[arg(long)]
        output: Option<String>,
    },
    /// Download World Rugby matches by year
    WorldRugby {
        /// First year
        first_year: i32,
        /// Last year (defaults to the first)
        last_year: Option<i32>,
    },
    /// Download the World Rugby rankings
    Rankings,
    /// Download the World Rugby country list with its sport and type lookups
    Countries,
}

#[derive(Debug, Clone, Copy)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown format: {}. Use table, json, or csv.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Status => commands::data_status(&config),
            DataCommands::Import { csv } => commands::data_import(&config, &csv),
        },
        Commands::Fit {
            kind,
            min_year,
            max_year,
        } => commands::fit(&config, kind, min_year, max_year),
        Commands::Factors { format, factor } => {
            commands::factors(&config, format, factor.as_deref())
        }
        Commands::Ratings { format } => commands::ratings(&config, format),
        Commands::Scrape { action } => match action {
            ScrapeCommands::Live {
                fixtures_only,
                results_only,
                offline,
                output,
            } => commands::scrape_live(&config, fixtures_only, results_only, offline, output),
            ScrapeCommands::Parse {
                files,
                results,
                output,
            } => commands::scrape_parse(&config, &files, results, output),
            ScrapeCommands::WorldRugby {
                first_year,
                last_year,
            } => commands::scrape_world_rugby(&config, first_year, last_year),
            ScrapeCommands::Rankings => commands::scrape_rankings(&config),
            ScrapeCommands::Countries => commands::scrape_countries(&config),
        },
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use rugby_sos::data::export::{read_csv, write_csv};
    use rugby_sos::data::scrapers::livesport::LivesportScraper;
    use rugby_sos::data::scrapers::world_rugby::WorldRugbyScraper;
    use rugby_sos::data::scrapers::{merge_rows, Scraper};
    use rugby_sos::data::Database;
    use rugby_sos::model::{self, TeamRating};
    use rugby_sos::{FactorEstimate, MatchRow, SosError};
    use std::path::Path;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all(&config.data.diagnostics_dir)?;
        Database::open(&config.data.database_path)?;
        println!(
            "Created database at {} and {}/",
            config.data.database_path, config.data.diagnostics_dir
        );

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'rugby-sos scrape live' to fetch match data");
        println!("  3. Run 'rugby-sos data import <csv>' to load results");
        println!("  4. Run 'rugby-sos fit' to fit the score model");

        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        println!("Database Status");
        println!("───────────────────────────────");
        println!("  Path:     {}", config.data.database_path);
        println!("  Teams:    {}", stats.team_count);
        println!("  Games:    {}", stats.game_count);
        println!("  Results:  {}", stats.result_count);
        if let (Some(earliest), Some(latest)) = (stats.earliest_year, stats.latest_year) {
            println!("  Seasons:  {} to {}", earliest, latest);
        }
        println!("  Factors:  {}", stats.factor_count);

        Ok(())
    }

    pub fn data_import(config: &Config, path: &str) -> Result<()> {
        let rows = read_csv(path)?;
        println!("Read {} matches from {}", rows.len(), path);

        let results: Vec<_> = rows
            .iter()
            .zip(MatchRow::unique_game_ids(&rows))
            .filter_map(|(row, game_id)| row.result_rows(&game_id))
            .flatten()
            .collect();
        let skipped = rows.iter().filter(|r| !r.is_completed()).count();

        let mut db = Database::open(&config.data.database_path)?;
        let count = db.upsert_results(&results)?;
        println!(
            "Stored {} result rows ({} fixtures skipped)",
            count, skipped
        );

        Ok(())
    }

    pub fn fit(
        config: &Config,
        kind: Option<ModelKind>,
        min_year: Option<i32>,
        max_year: Option<i32>,
    ) -> Result<()> {
        let mut model_config = config.model.clone();
        if let Some(kind) = kind {
            model_config.kind = kind;
        }
        if let Some(year) = min_year {
            model_config.min_year = year;
        }
        if let Some(year) = max_year {
            model_config.max_year = year;
        }

        let mut db = Database::open(&config.data.database_path)?;
        let observations = db.fetch_observations(
            model_config.min_year,
            model_config.max_year,
            model_config.reference_year,
        )?;
        log::info!(
            "Fetched {} observations for {} to {}",
            observations.len(),
            model_config.min_year,
            model_config.max_year
        );
        if observations.is_empty() {
            return Err(SosError::NoData(format!(
                "no results between {} and {}. Run 'rugby-sos data import' first.",
                model_config.min_year, model_config.max_year
            )));
        }

        let fitted = fit_and_store(&mut db, &observations, &model_config, config).map_err(|e| {
            log::error!("Model fit failed: {}", e);
            e
        })?;

        println!("\nFit complete ({})", fitted.kind());
        println!("───────────────────────────────");
        for rating in fitted.team_ratings().iter().take(5) {
            println!("  {:<28} {:>+8.4}", rating.team, rating.net);
        }

        Ok(())
    }

    fn fit_and_store(
        db: &mut Database,
        observations: &[rugby_sos::Observation],
        model_config: &rugby_sos::ModelConfig,
        config: &Config,
    ) -> Result<model::FittedModel> {
        let frame = model::ModelFrame::build(observations, model_config.include_game_effect)?;
        let fitted = model::fit_frame(&frame, model_config)?;
        db.replace_parameter_levels(fitted.parameter_levels())?;

        let summary = fitted.summary();
        for line in summary.lines() {
            log::info!("{}", line);
        }

        std::fs::create_dir_all(&config.data.diagnostics_dir)?;
        let summary_path = Path::new(&config.data.diagnostics_dir).join("fit_summary.log");
        std::fs::write(&summary_path, &summary)?;
        log::info!("Wrote {}", summary_path.display());

        let estimates = fitted.factor_estimates();
        db.replace_basic_factors(&estimates)?;
        log::info!("Stored {} factor estimates", estimates.len());

        Ok(fitted)
    }

    pub fn factors(config: &Config, format: OutputFormat, factor: Option<&str>) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let estimates = db.basic_factors(factor)?;

        if estimates.is_empty() {
            println!("No factor estimates stored. Run 'rugby-sos fit' first.");
            return Ok(());
        }

        match format {
            OutputFormat::Table => print_factor_table(&estimates),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&estimates)?),
            OutputFormat::Csv => write_stdout_csv(&estimates)?,
        }
        Ok(())
    }

    pub fn ratings(config: &Config, format: OutputFormat) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let estimates = db.basic_factors(None)?;
        let levels = db.parameter_levels()?;
        let ratings = model::team_ratings_with_levels(&estimates, &levels);

        if ratings.is_empty() {
            println!("No team estimates stored. Run 'rugby-sos fit' first.");
            return Ok(());
        }

        match format {
            OutputFormat::Table => print_ratings_table(&ratings),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ratings)?),
            OutputFormat::Csv => write_stdout_csv(&ratings)?,
        }
        Ok(())
    }

    pub fn scrape_live(
        config: &Config,
        fixtures_only: bool,
        results_only: bool,
        offline: bool,
        output: Option<String>,
    ) -> Result<()> {
        let scraper = LivesportScraper::new(&config.scrape)?.offline_only(offline);
        if offline {
            println!("Offline mode: using cached pages only");
        }

        let rows = if fixtures_only {
            scraper.fetch_fixtures()?
        } else if results_only {
            scraper.fetch_results()?
        } else {
            scraper.scrape()?
        };

        write_rows(rows, output.as_deref().unwrap_or(&config.scrape.output_csv))
    }

    pub fn scrape_parse(
        config: &Config,
        files: &[String],
        results: bool,
        output: Option<String>,
    ) -> Result<()> {
        let scraper = LivesportScraper::new(&config.scrape)?;
        let rows = scraper.parse_files(files, results);
        println!("Parsed {} matches from {} files", rows.len(), files.len());

        write_rows(
            merge_rows(vec![rows]),
            output.as_deref().unwrap_or(&config.scrape.output_csv),
        )
    }

    pub fn scrape_world_rugby(config: &Config, first_year: i32, last_year: Option<i32>) -> Result<()> {
        let scraper = WorldRugbyScraper::new(
            &config.world_rugby,
            &config.scrape,
            first_year,
            last_year.unwrap_or(first_year),
        )?;
        println!("Fetching World Rugby matches from {}...", scraper.source());

        let written = scraper.export_years(&config.world_rugby.output_dir)?;
        for path in &written {
            println!("  Wrote {}", path.display());
        }
        Ok(())
    }

    pub fn scrape_rankings(config: &Config) -> Result<()> {
        let scraper = WorldRugbyScraper::new(&config.world_rugby, &config.scrape, 0, 0)?;
        let path = Path::new(&config.world_rugby.output_dir).join("rankings.json");
        scraper.fetch_rankings(&path)?;
        println!("Wrote rankings to {}", path.display());
        Ok(())
    }

    pub fn scrape_countries(config: &Config) -> Result<()> {
        let scraper = WorldRugbyScraper::new(&config.world_rugby, &config.scrape, 0, 0)?;
        println!("Fetching World Rugby countries from {}...", scraper.source());

        for path in scraper.fetch_countries(&config.world_rugby.output_dir)? {
            println!("  Wrote {}", path.display());
        }
        Ok(())
    }

    fn write_rows(mut rows: Vec<MatchRow>, path: &str) -> Result<()> {
        if rows.is_empty() {
            println!("No matches found. Check the page markup or cache directory.");
            return Ok(());
        }
        rugby_sos::data::export::sort_rows(&mut rows);

        let completed = rows.iter().filter(|r| r.is_completed()).count();
        let count = write_csv(path, &rows)?;
        println!(
            "Wrote {} matches ({} completed, {} fixtures) to {}",
            count,
            completed,
            count - completed,
            path
        );
        Ok(())
    }

    fn print_factor_table(estimates: &[FactorEstimate]) {
        println!("{:<12} {:<8} {:<40} {:>10}", "Factor", "Type", "Level", "Estimate");
        println!("{}", "─".repeat(73));
        for est in estimates {
            println!(
                "{:<12} {:<8} {:<40} {:>10.4}",
                est.factor,
                est.kind.as_str(),
                est.level,
                est.estimate
            );
        }
    }

    fn print_ratings_table(ratings: &[TeamRating]) {
        println!("{:<4} {:<28} {:>9} {:>9} {:>9}", "#", "Team", "Attack", "Defence", "Net");
        println!("{}", "─".repeat(63));
        for (i, r) in ratings.iter().enumerate() {
            println!(
                "{:<4} {:<28} {:>+9.4} {:>+9.4} {:>+9.4}",
                i + 1,
                r.team,
                r.attack,
                r.defence,
                r.net
            );
        }
    }

    fn write_stdout_csv<T: serde::Serialize>(records: &[T]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(std::io::stdout());
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
