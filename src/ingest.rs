//! Ingestion pipeline orchestration.
//!
//! Drives one full reload of the source file: validate the source header,
//! connect (with retry), provision the collection, then stream normalized
//! records through the bulk loader. Stages run strictly in that order:
//!
//! ```text
//! NotConnected → Connecting → Connected → Provisioning → Provisioned → Loading → Done
//!                     └──→ Failed (retries exhausted)
//! ```
//!
//! Fatal outcomes are an unreadable or invalid source header, exhausted
//! connection retries, and a provisioning error from the store. Once
//! `Loading` starts the run always reaches `Done`: rejected documents and
//! failed bulk requests are counted, and a read error partway through the
//! source stops the stream and is carried in [`LoadSummary::source_error`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::loader::{self, BulkOptions};
use crate::models::{RunState, SchemaDescriptor};
use crate::normalize::{self, SourceReader, SourceReport, SourceStats};
use crate::progress::{LoadProgressEvent, LoadProgressReporter};
use crate::provision;
use crate::store::{ElasticStore, SearchStore};

/// What a finished run reports back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub collection: String,
    pub source: PathBuf,
    /// Whether this run created the collection.
    pub created: bool,
    pub rows: u64,
    /// Rows whose date did not parse; still submitted, with a null date.
    pub unparseable_dates: u64,
    pub attempted: u64,
    pub failed: u64,
    pub chunks: u64,
    pub elapsed: Duration,
    /// Read error that cut the source short. Everything before it was
    /// submitted and is counted above.
    pub source_error: Option<String>,
}

impl LoadSummary {
    /// Whether every source row was read.
    pub fn is_complete(&self) -> bool {
        self.source_error.is_none()
    }
}

/// Tracks and logs the run's position in the state machine.
struct Run {
    state: RunState,
}

impl Run {
    fn new() -> Self {
        Self {
            state: RunState::NotConnected,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
    }
}

/// Load the configured source file into the configured Elasticsearch store.
pub async fn run_load(config: &Config, progress: &dyn LoadProgressReporter) -> Result<LoadSummary> {
    let store = ElasticStore::new(&config.store).context("Failed to build store client")?;
    let store: Arc<dyn SearchStore> = Arc::new(store);
    run_load_with_store(config, store, progress).await
}

/// Run the pipeline against any [`SearchStore`].
///
/// This is the entry point used by tests and by embedders that bring their
/// own backend.
pub async fn run_load_with_store(
    config: &Config,
    store: Arc<dyn SearchStore>,
    progress: &dyn LoadProgressReporter,
) -> Result<LoadSummary> {
    // Bad input is rejected before the store is touched.
    let source = SourceReader::open(&config.source.path, config.source.delimiter_byte())?;
    run_load_from_source(config, store, source, progress).await
}

/// Run the pipeline over an already-validated source.
///
/// `config.source` is not consulted; the summary names `source.path()`.
pub async fn run_load_from_source(
    config: &Config,
    store: Arc<dyn SearchStore>,
    source: SourceReader,
    progress: &dyn LoadProgressReporter,
) -> Result<LoadSummary> {
    let started = Instant::now();
    let collection = config.index.name.as_str();
    let source_path = source.path().to_path_buf();
    let mut run = Run::new();

    run.advance(RunState::Connecting);
    let conn = match loader::connect(
        store,
        &config.store.url,
        config.store.max_retries,
        config.store.retry_delay(),
    )
    .await
    {
        Ok(conn) => conn,
        Err(e) => {
            run.advance(RunState::Failed);
            return Err(e.into());
        }
    };
    run.advance(RunState::Connected);

    run.advance(RunState::Provisioning);
    let created =
        provision::ensure_schema(conn.store(), collection, &SchemaDescriptor::price_bars())
            .await
            .with_context(|| format!("Failed to provision collection '{}'", collection))?;
    run.advance(RunState::Provisioned);

    run.advance(RunState::Loading);
    progress.report(LoadProgressEvent::Reading {
        source: source_path.display().to_string(),
    });

    let (records, producer) = normalize::spawn_producer(source, config.load.channel_capacity);
    let options = BulkOptions {
        batch_size: config.load.batch_size,
        workers: config.load.workers,
    };
    let mut submission = loader::submit(&conn, collection, records, options);

    let report_every = config.load.batch_size as u64;
    let mut settled = 0u64;
    let mut failed = 0u64;
    while let Some(outcome) = submission.outcomes.recv().await {
        settled += 1;
        if !outcome.success {
            failed += 1;
            let diagnostic = outcome
                .diagnostic
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            warn!(id = %outcome.id, diagnostic = %diagnostic, "document rejected");
        }
        if settled % report_every == 0 {
            progress.report(LoadProgressEvent::Loading {
                collection: collection.to_string(),
                submitted: settled,
                failed,
            });
        }
    }
    let counts = submission.finish().await;

    let SourceReport { stats, error: read_error } =
        producer.await.context("Source reader task failed")?;
    let source_error = read_error.map(|e| {
        error!(
            source = %source_path.display(),
            rows = stats.rows,
            error = %e,
            "source read stopped early"
        );
        e.to_string()
    });
    run.advance(RunState::Done);

    progress.report(LoadProgressEvent::Loading {
        collection: collection.to_string(),
        submitted: counts.attempted,
        failed: counts.failed,
    });

    let summary = LoadSummary {
        collection: collection.to_string(),
        source: source_path,
        created,
        rows: stats.rows,
        unparseable_dates: stats.unparseable_dates,
        attempted: counts.attempted,
        failed: counts.failed,
        chunks: counts.chunks,
        elapsed: started.elapsed(),
        source_error,
    };

    info!(
        collection,
        attempted = summary.attempted,
        failed = summary.failed,
        chunks = summary.chunks,
        "load finished"
    );
    Ok(summary)
}

/// Normalize the source without contacting the store.
pub fn dry_run(config: &Config) -> Result<SourceStats> {
    let source = SourceReader::open(&config.source.path, config.source.delimiter_byte())?;
    let (_, stats) = source.read_all()?;
    Ok(stats)
}

/// Print a run summary to stdout.
pub fn print_summary(summary: &LoadSummary) {
    println!("load {}", summary.collection);
    println!("  source: {}", summary.source.display());
    println!(
        "  collection: {}",
        if summary.created {
            "created"
        } else {
            "already existed"
        }
    );
    println!("  rows read: {}", summary.rows);
    if summary.unparseable_dates > 0 {
        println!("  rows with unparseable date: {}", summary.unparseable_dates);
    }
    println!("  documents attempted: {}", summary.attempted);
    println!("  documents failed: {}", summary.failed);
    println!("  bulk requests: {}", summary.chunks);
    println!("  elapsed: {:.2}s", summary.elapsed.as_secs_f64());
    match &summary.source_error {
        None => println!("ok"),
        Some(e) => println!("  source error: {}", e),
    }
}
