use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use forecast_query::QueryKind;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "forecast-hub", about = "Versioned forecast storage with as-of queries")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite store (overrides config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Catalog file, JSON or TOML (overrides config)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a version and load predictions into it
    Load(commands::load::LoadArgs),
    /// Query forecasts as of an instant
    Query(commands::query::QueryArgs),
    /// Query ground truth as of an instant
    Truth(commands::query::QueryArgs),
    /// List versions of a model and time-point
    Versions(commands::versions::VersionsArgs),
    /// Print the full state of a version
    Snapshot(commands::versions::SnapshotArgs),
    /// Delete the newest version of a model and time-point
    DeleteVersion(commands::versions::DeleteVersionArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

/// How long shutdown waits for blocking query workers still running.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    block_on_bounded(run(cli))?
}

/// Run `future` on a fresh runtime, then shut the runtime down without
/// waiting more than [`SHUTDOWN_GRACE`] for blocking tasks it left behind.
fn block_on_bounded<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(future);
    // a timed-out query may leave a worker behind
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(output)
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::ConfigLoader::load()?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    if let Some(catalog) = cli.catalog {
        config.catalog.path = catalog;
    }

    match cli.command {
        Commands::Load(args) => commands::load::run(args, &config),
        Commands::Query(args) => commands::query::run(QueryKind::Forecasts, args, &config).await,
        Commands::Truth(args) => commands::query::run(QueryKind::Truth, args, &config).await,
        Commands::Versions(args) => commands::versions::list(args, &config),
        Commands::Snapshot(args) => commands::versions::snapshot(args, &config),
        Commands::DeleteVersion(args) => commands::versions::delete(args, &config),
        Commands::Config(args) => commands::config::run(args, &config),
    }
}
