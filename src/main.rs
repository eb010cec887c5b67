use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

use census_layers::analytics::{self, CategoryValue};
use census_layers::audit;
use census_layers::config::{self, Config};
use census_layers::observability::{self, metrics};
use census_layers::raw_source;
use census_layers::{LayerStore, Pipeline, SqliteStore};

#[derive(Parser)]
#[command(name = "census_layers")]
#[command(about = "Layered census income pipeline: clean, model, audit and analyse")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the SQLite store path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Write a Prometheus text snapshot of the run's metrics to this file
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append raw records from a JSON array or NDJSON file to the raw store
    LoadRaw { file: PathBuf },
    /// Rebuild the cleaned layer from the raw store
    Clean,
    /// Rebuild the dimensional layer from the cleaned layer
    Model,
    /// Clean, then model
    Run,
    /// Null-density and key-uniqueness audit of the cleaned layer
    Audit,
    /// Top geographies by average monthly income within one category
    Rank {
        /// Sex value to rank, e.g. "Men"
        #[arg(long, conflicts_with = "race", required_unless_present = "race")]
        sex: Option<String>,
        /// Race/color value to rank
        #[arg(long)]
        race: Option<String>,
        /// Number of geographies to return
        #[arg(long)]
        top: Option<usize>,
    },
    /// Male/female income gap per geography
    GenderGap,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.store.db_path = db;
    }

    let _guard = observability::init_logging(&config.logging.dir, &config.logging.file_name)
        .context("initializing logging")?;
    if let Err(e) = metrics::init() {
        warn!("Metrics disabled: {}", e);
    }

    let store = SqliteStore::open(&config.store.db_path)
        .with_context(|| format!("opening store {}", config.store.db_path.display()))?;
    let result = execute(cli.command, &config, &store);

    if let Some(path) = cli.metrics_out {
        if let Err(e) = metrics::write_snapshot(&path) {
            error!("Failed to write metrics snapshot to {}: {}", path.display(), e);
        }
    }
    result
}

fn execute(command: Commands, config: &Config, store: &dyn LayerStore) -> Result<()> {
    let pipeline = Pipeline::new(store, &config.cleaning);

    match command {
        Commands::LoadRaw { file } => {
            let records = raw_source::read_raw_file(&file)
                .with_context(|| format!("reading raw records from {}", file.display()))?;
            let appended = store.append_raw(&records)?;
            info!(appended, "Raw rows loaded");
            println!("📥 Appended {} raw rows from {}", appended, file.display());
        }
        Commands::Clean => {
            let report = pipeline.clean_stage().context("cleaning stage failed")?;
            print_json(&report)?;
        }
        Commands::Model => {
            let report = pipeline.model_stage().context("dimensional stage failed")?;
            print_json(&report)?;
        }
        Commands::Run => {
            let report = pipeline.run().context("pipeline run failed")?;
            print_json(&report)?;
        }
        Commands::Audit => {
            let cleaned = store.read_cleaned()?;
            let report = audit::run_audit(&cleaned, &config.audit);
            print_json(&report)?;
            if !report.passed() {
                bail!(
                    "audit failed: {} null-ratio breach(es), {} duplicate key(s)",
                    report.breaches().len(),
                    report.duplicate_keys
                );
            }
        }
        Commands::Rank { sex, race, top } => {
            let category = match (sex, race) {
                (Some(sex), _) => CategoryValue::Sex(sex),
                (None, Some(race)) => CategoryValue::RaceOrColor(race),
                (None, None) => bail!("either --sex or --race is required"),
            };
            let n = top.unwrap_or(config.analytics.default_top_n);
            let cleaned = store.read_cleaned()?;
            print_json(&analytics::rank_by_category(&cleaned, &category, n))?;
        }
        Commands::GenderGap => {
            let cleaned = store.read_cleaned()?;
            print_json(&analytics::calculate_gender_gap(
                &cleaned,
                &config.analytics.gender_labels,
            ))?;
        }
    }
    Ok(())
}
