//! # Bar Loader CLI (`bars`)
//!
//! The `bars` binary loads daily price bars from a delimited file into an
//! Elasticsearch-compatible store and reads them back.
//!
//! ## Usage
//!
//! ```bash
//! bars --config ./config/bars.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bars load` | Full reload: provision the collection and bulk-submit every row |
//! | `bars provision` | Create the collection with its schema if missing |
//! | `bars ping` | Check the store is reachable, with the configured retries |
//! | `bars query` | Print loaded bars sorted by date |
//!
//! ## Examples
//!
//! ```bash
//! # Validate and count the source without touching the store
//! bars load --dry-run
//!
//! # Load a different file into a different index, 200 docs per request
//! bars load --file ./aapl.csv --index aapl --batch-size 200
//!
//! # Read back the first 1000 bars
//! bars query --limit 1000
//! ```

use std::path::PathBuf;

use anyhow::{bail, Result};
use bar_loader::config::{self, validate_index_name, Config};
use bar_loader::models::SchemaDescriptor;
use bar_loader::progress::ProgressMode;
use bar_loader::{ingest, loader, provision, query};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bar Loader CLI: bulk-load daily price bars into a search store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bars.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "bars",
    about = "Bulk-load daily price bars into an Elasticsearch-compatible store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bars.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reload the source file into the collection.
    ///
    /// Connects (retrying), creates the collection if it is missing, then
    /// streams every row as a new document. Rejected documents are logged
    /// and counted; they do not fail the run.
    Load {
        /// Source file, overriding `[source].path`.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Target collection, overriding `[index].name`.
        #[arg(long)]
        index: Option<String>,

        /// Documents per bulk request, overriding `[load].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent bulk requests, overriding `[load].workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Normalize the file and report counts without contacting the store.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Create the collection with the price-bar schema if it does not exist.
    Provision {
        #[arg(long)]
        index: Option<String>,
    },

    /// Probe the store with the configured retry budget.
    Ping,

    /// Fetch loaded bars and print them sorted by date.
    Query {
        #[arg(long)]
        index: Option<String>,

        /// Maximum number of bars to fetch (at most 10000).
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Human,
    Json,
    Off,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

fn resolve_index(cfg: &Config, index: Option<String>) -> Result<String> {
    let name = index.unwrap_or_else(|| cfg.index.name.clone());
    validate_index_name(&name)?;
    Ok(name)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Load {
            file,
            index,
            batch_size,
            workers,
            dry_run,
            progress,
        } => {
            if let Some(file) = file {
                cfg.source.path = file;
            }
            if let Some(index) = index {
                cfg.index.name = index;
            }
            if let Some(batch_size) = batch_size {
                cfg.load.batch_size = batch_size;
            }
            if let Some(workers) = workers {
                cfg.load.workers = workers;
            }
            cfg.validate()?;

            if dry_run {
                let stats = ingest::dry_run(&cfg)?;
                println!("load {} (dry-run)", cfg.index.name);
                println!("  source: {}", cfg.source.path.display());
                println!("  rows read: {}", stats.rows);
                println!("  rows with unparseable date: {}", stats.unparseable_dates);
                return Ok(());
            }

            let reporter = progress.mode().reporter();
            let summary = ingest::run_load(&cfg, reporter.as_ref()).await?;
            ingest::print_summary(&summary);
            if let Some(e) = &summary.source_error {
                bail!("load incomplete: {}", e);
            }
        }
        Commands::Provision { index } => {
            let index = resolve_index(&cfg, index)?;
            let conn = loader::connect_elastic(&cfg.store).await?;
            let created =
                provision::ensure_schema(conn.store(), &index, &SchemaDescriptor::price_bars())
                    .await?;
            if created {
                println!("Collection '{}' created.", index);
            } else {
                println!("Collection '{}' already exists.", index);
            }
        }
        Commands::Ping => {
            let conn = loader::connect_elastic(&cfg.store).await?;
            info!(url = conn.url(), "ping ok");
            println!("ok");
        }
        Commands::Query { index, limit } => {
            let index = resolve_index(&cfg, index)?;
            query::run_query(&cfg, &index, limit).await?;
        }
    }

    Ok(())
}
