use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod analytics;
mod config;
mod db;
mod error;
mod grades;
mod models;
mod report;
mod service;

use config::Config;
use grades::GradeCatalog;
use models::{HistoryFilters, NewPrediction};

#[derive(Parser)]
#[command(name = "leaf-analytics")]
#[command(about = "Grading history and analytics for tobacco leaf predictions", long_about = None)]
struct Cli {
    /// Path to a config file (defaults to ./leafgrade.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo upload history
    Seed,
    /// Import upload history from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Save a prediction result to a user's history
    Record {
        #[arg(long, env = "LEAF_USER_ID")]
        user: String,
        #[arg(long)]
        grade: String,
        #[arg(long)]
        confidence: String,
        #[arg(long, default_value = "")]
        image_url: String,
    },
    /// List a user's upload history
    History {
        #[arg(long, env = "LEAF_USER_ID")]
        user: String,
        /// Earliest processing date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest processing date, exclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        min_confidence: Option<f64>,
        #[arg(long)]
        max_confidence: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Compute analytics for a user's history
    Analytics {
        #[arg(long, env = "LEAF_USER_ID")]
        user: String,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute analytics from a JSON export of prediction records
    AnalyzeFile {
        #[arg(long)]
        input: PathBuf,
        /// Only this user's records; required when the export holds several users
        #[arg(long, env = "LEAF_USER_ID")]
        user: Option<String>,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a default leafgrade.toml
    InitConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::InitConfig => init_config(),
        Commands::AnalyzeFile {
            input,
            user,
            format,
            out,
        } => {
            let config = Config::resolve(cli.config.as_deref())?;
            analyze_file(&config, &input, user.as_deref(), format, out.as_deref())
        }
        command => {
            let config = Config::resolve(cli.config.as_deref())?;
            let catalog = GradeCatalog::from(&config.grades);
            if catalog.is_empty() {
                warn!("no known grades configured; per-grade figures will be empty");
            }
            debug!(grades = ?catalog.grades(), "loaded grade catalog");

            let pool = connect(&config).await?;
            run_with_pool(command, &pool, &config, &catalog).await
        }
    }
}

fn analyze_file(
    config: &Config,
    input: &Path,
    user: Option<&str>,
    format: Format,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let records = models::parse_export(&content)
        .with_context(|| format!("failed to parse records in {}", input.display()))?;
    info!(path = %input.display(), records = records.len(), "loaded exported records");

    let (user_id, records) = service::scope_to_user(records, user)?;
    let catalog = GradeCatalog::from(&config.grades);
    let now = Utc::now();
    let summary = analytics::summarize(&records, &catalog, &config.analytics, now);
    emit(&user_id, now, &summary, format, out)
}

async fn run_with_pool(
    command: Commands,
    pool: &PgPool,
    config: &Config,
    catalog: &GradeCatalog,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(pool).await?;
            println!("Seeded {inserted} predictions for {}.", db::SEED_USER);
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(pool, &csv).await?;
            println!("Inserted {inserted} predictions from {}.", csv.display());
        }
        Commands::Record {
            user,
            grade,
            confidence,
            image_url,
        } => {
            if catalog.normalize(&grade).is_none() {
                warn!(%grade, "grade is not in the configured catalog");
            }
            let prediction = NewPrediction {
                user_id: user,
                grade,
                confidence,
                image_url,
                processed_at: Utc::now(),
                source_key: None,
            };
            db::insert_prediction(pool, &prediction).await?;
            println!("Saved {} for {} to history.", prediction.grade, prediction.user_id);
        }
        Commands::History {
            user,
            from,
            to,
            grade,
            min_confidence,
            max_confidence,
            limit,
        } => {
            let filters = HistoryFilters {
                from: from.map(start_of_day),
                to: to.map(start_of_day),
                grade,
                min_confidence,
                max_confidence,
                limit: Some(limit),
            };
            let user = user.trim();
            if user.is_empty() {
                return Err(error::AnalyticsError::MissingUser.into());
            }
            let records = db::fetch_records(pool, user, &filters).await?;

            if records.is_empty() {
                println!("No predictions found for {user}.");
                return Ok(());
            }

            println!("Upload history for {user}:");
            for record in records.iter() {
                println!(
                    "- [{}] {} {} ({}% confidence) {}",
                    record.id.simple(),
                    record.processed_at.format("%Y-%m-%d %H:%M"),
                    record.grade,
                    record.confidence,
                    record.image_url
                );
            }
        }
        Commands::Analytics { user, format, out } => {
            let now = Utc::now();
            let summary =
                service::compute_analytics(pool, catalog, &config.analytics, &user, now).await?;
            emit(user.trim(), now, &summary, format, out.as_deref())?;
        }
        Commands::AnalyzeFile { .. } | Commands::InitConfig => {
            anyhow::bail!("this command does not use the database")
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn init_config() -> anyhow::Result<()> {
    let path = Path::new(config::DEFAULT_CONFIG_FILE);
    if path.exists() {
        anyhow::bail!("{} already exists; edit it or remove it first", path.display());
    }

    std::fs::write(path, Config::default_toml()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Created {} with default settings.", path.display());
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url()
        .context("DATABASE_URL must be set (environment or [database] url in config)")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_seconds))
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    info!(max_connections = config.database.max_connections, "connected to Postgres");
    Ok(pool)
}

fn emit(
    user_id: &str,
    now: DateTime<Utc>,
    summary: &models::AnalyticsSummary,
    format: Format,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let rendered = match format {
        Format::Markdown => report::build_report(user_id, now, summary),
        Format::Json => report::build_json(summary)?,
    };

    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
