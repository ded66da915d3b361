use anyhow::Context;
use clap::{Parser, Subcommand};
use classical_concerts::config::Config;
use classical_concerts::constants::INTAKE_API_KEY_ENV;
use classical_concerts::db::SqliteStorage;
use classical_concerts::intake;
use classical_concerts::logging;
use classical_concerts::metrics;
use classical_concerts::oracle::GeminiOracle;
use classical_concerts::pipeline::{
    self, Classifier, ComposerExtractor, ComposerResolver, PipelineContext, Promoter,
};
use classical_concerts::server::{self, AppState};
use classical_concerts::storage::Storage;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "classical_concerts")]
#[command(about = "Classify, deduplicate and resolve composers of scraped classical concerts")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the SQLite database path from the config
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Label unanalyzed candidate events as classical or not
    Classify,
    /// Copy classical candidates into the concert table
    Promote,
    /// Extract raw composer names from concert descriptions
    ExtractComposers,
    /// Link extracted composer names to composer rows
    ResolveComposers,
    /// Run all four stages in order
    Run,
    /// Upload a JSON array of records
    Upload {
        #[arg(long)]
        file: PathBuf,
        /// Upload as candidate events instead of concerts
        #[arg(long)]
        potential: bool,
    },
    /// Serve the intake HTTP endpoints
    Serve,
}

fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn pipeline_context(config: &Config, storage: Arc<dyn Storage>) -> anyhow::Result<PipelineContext> {
    let oracle = GeminiOracle::from_env(&config.oracle)?;
    Ok(PipelineContext::new(storage, Arc::new(oracle))
        .with_similarity_threshold(config.resolver.similarity_threshold))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let db_path = cli
        .database
        .unwrap_or_else(|| PathBuf::from(&config.database.path));
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );
    info!(database = %db_path.display(), "Storage ready");

    match cli.command {
        Commands::Classify => {
            let ctx = pipeline_context(&config, storage)?;
            print_report(&Classifier::new(ctx).run().await?)?;
        }
        Commands::Promote => {
            print_report(&Promoter::new(storage).run().await?)?;
        }
        Commands::ExtractComposers => {
            let ctx = pipeline_context(&config, storage)?;
            print_report(&ComposerExtractor::new(ctx).run().await?)?;
        }
        Commands::ResolveComposers => {
            let ctx = pipeline_context(&config, storage)?;
            print_report(&ComposerResolver::new(ctx).run().await?)?;
        }
        Commands::Run => {
            let ctx = pipeline_context(&config, storage)?;
            let report = pipeline::run_all(&ctx).await?;
            if let Some(failure) = report.failure() {
                error!(stage = failure.stage, "Pipeline run stopped early: {}", failure.message);
            }
            print_report(&report)?;
        }
        Commands::Upload { file, potential } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<Value> = serde_json::from_str(&content)?;
            let report = if potential {
                intake::upload_potential_concerts(storage.as_ref(), records).await?
            } else {
                intake::upload_concerts(storage.as_ref(), records).await?
            };
            print_report(&report.as_tuple())?;
        }
        Commands::Serve => {
            let api_key = std::env::var(INTAKE_API_KEY_ENV)
                .with_context(|| format!("{} environment variable not set", INTAKE_API_KEY_ENV))?;
            server::start_server(AppState { storage, api_key }, &config.server.bind).await?;
        }
    }
    Ok(())
}
