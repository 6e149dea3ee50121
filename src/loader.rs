//! Bulk loading: connection establishment and chunked submission.
//!
//! [`connect`] probes the store until it answers or the retry budget runs
//! out. [`submit`] consumes records from a channel, wraps each in a
//! [`Document`] with a fresh id, groups them into chunks of `batch_size`
//! and sends each chunk as one bulk request. At most `workers` chunks are in
//! flight at once.
//!
//! Failures are reported, never retried. A chunk whose request fails marks
//! each of its documents failed with the chunk diagnostic; other chunks are
//! unaffected. Per-document outcomes stream back through a channel as chunks
//! complete, in no particular order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::IngestError;
use crate::models::{Document, DocumentOutcome, Record};
use crate::store::{ElasticStore, SearchStore};

/// A store handle that has answered a liveness probe.
///
/// Cloning is cheap; every bulk worker holds a clone of the same handle.
#[derive(Clone)]
pub struct Connection {
    store: Arc<dyn SearchStore>,
    url: String,
}

impl Connection {
    pub fn store(&self) -> &dyn SearchStore {
        self.store.as_ref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Probe `store` up to `max_retries` times, sleeping `retry_delay` after
/// each failed attempt except the last.
///
/// A probe that errors and a probe that answers "not healthy" are both
/// failures. Exhausting the budget yields [`IngestError::Connection`].
pub async fn connect(
    store: Arc<dyn SearchStore>,
    url: &str,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<Connection, IngestError> {
    let mut reason = "no probe attempted".to_string();

    for attempt in 1..=max_retries {
        match store.ping().await {
            Ok(true) => {
                info!(url, attempt, "store reachable");
                return Ok(Connection {
                    store,
                    url: url.to_string(),
                });
            }
            Ok(false) => reason = "liveness probe failed".to_string(),
            Err(e) => reason = e.to_string(),
        }

        warn!(url, attempt, max_retries, reason = %reason, "store not reachable");
        if attempt < max_retries {
            tokio::time::sleep(retry_delay).await;
        }
    }

    Err(IngestError::Connection {
        url: url.to_string(),
        attempts: max_retries,
        reason,
    })
}

/// Build an [`ElasticStore`] from config and [`connect`] to it.
pub async fn connect_elastic(config: &StoreConfig) -> Result<Connection, IngestError> {
    let store = ElasticStore::new(config)?;
    let url = store.url().to_string();
    connect(
        Arc::new(store),
        &url,
        config.max_retries,
        config.retry_delay(),
    )
    .await
}

/// Chunking and concurrency knobs for [`submit`].
#[derive(Debug, Clone, Copy)]
pub struct BulkOptions {
    pub batch_size: usize,
    pub workers: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            workers: 4,
        }
    }
}

/// Running totals shared by every bulk worker.
#[derive(Debug, Default)]
pub struct LoadTally {
    attempted: AtomicU64,
    failed: AtomicU64,
    chunks: AtomicU64,
}

impl LoadTally {
    fn record(&self, outcomes: &[DocumentOutcome]) {
        let failed = outcomes.iter().filter(|o| !o.success).count() as u64;
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.attempted
            .fetch_add(outcomes.len() as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoadCounts {
        LoadCounts {
            attempted: self.attempted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCounts {
    pub attempted: u64,
    pub failed: u64,
    pub chunks: u64,
}

/// An in-progress bulk load.
///
/// Drain [`outcomes`](Submission::outcomes) until it yields `None`, then call
/// [`finish`](Submission::finish) for the totals.
pub struct Submission {
    pub outcomes: mpsc::Receiver<DocumentOutcome>,
    tally: Arc<LoadTally>,
    dispatcher: JoinHandle<()>,
}

impl Submission {
    /// Wait for every chunk to settle and return the totals.
    pub async fn finish(self) -> LoadCounts {
        let Submission {
            outcomes,
            tally,
            dispatcher,
        } = self;
        drop(outcomes);
        if let Err(e) = dispatcher.await {
            error!(error = %e, "bulk dispatcher task failed");
        }
        tally.snapshot()
    }

    /// Consume the whole outcome stream, keeping only the failures.
    pub async fn collect_failures(mut self) -> (Vec<DocumentOutcome>, LoadCounts) {
        let mut failures = Vec::new();
        while let Some(outcome) = self.outcomes.recv().await {
            if !outcome.success {
                failures.push(outcome);
            }
        }
        (failures, self.finish().await)
    }
}

/// Start submitting `records` to `collection`.
///
/// Returns immediately; work happens on spawned tasks. The outcome stream
/// closes once `records` is exhausted and every chunk has completed.
pub fn submit(
    conn: &Connection,
    collection: &str,
    records: mpsc::Receiver<Record>,
    options: BulkOptions,
) -> Submission {
    let batch_size = options.batch_size.max(1);
    let workers = options.workers.max(1);
    let (tx, rx) = mpsc::channel(batch_size * workers);
    let tally = Arc::new(LoadTally::default());

    let dispatcher = tokio::spawn(dispatch(
        conn.store.clone(),
        collection.to_string(),
        records,
        batch_size,
        workers,
        tx,
        tally.clone(),
    ));

    Submission {
        outcomes: rx,
        tally,
        dispatcher,
    }
}

async fn dispatch(
    store: Arc<dyn SearchStore>,
    collection: String,
    mut records: mpsc::Receiver<Record>,
    batch_size: usize,
    workers: usize,
    tx: mpsc::Sender<DocumentOutcome>,
    tally: Arc<LoadTally>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();
    let mut chunk = Vec::with_capacity(batch_size);

    loop {
        let next = records.recv().await;
        let exhausted = next.is_none();
        if let Some(record) = next {
            chunk.push(Document::new(&collection, record));
        }

        if chunk.len() == batch_size || (exhausted && !chunk.is_empty()) {
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(batch_size));
            // Waiting for a permit here is what bounds the fan-out.
            let permit = match permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let store = store.clone();
            let tx = tx.clone();
            let tally = tally.clone();
            in_flight.spawn(async move {
                submit_chunk(store.as_ref(), full, &tx, &tally).await;
                drop(permit);
            });
        }

        while let Some(joined) = in_flight.try_join_next() {
            log_join(joined);
        }
        if exhausted {
            break;
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "bulk worker panicked");
    }
}

async fn submit_chunk(
    store: &dyn SearchStore,
    chunk: Vec<Document>,
    tx: &mpsc::Sender<DocumentOutcome>,
    tally: &LoadTally,
) {
    let outcomes = match store.bulk_submit(&chunk).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            warn!(documents = chunk.len(), error = %e, "bulk request failed");
            let diagnostic = json!({ "type": "bulk_request_failed", "reason": e.to_string() });
            chunk
                .iter()
                .map(|doc| DocumentOutcome::failed(&doc.id, diagnostic.clone()))
                .collect()
        }
    };

    debug!(documents = outcomes.len(), "chunk settled");
    tally.record(&outcomes);
    for outcome in outcomes {
        // The caller stopped listening; totals are still kept in the tally.
        if tx.send(outcome).await.is_err() {
            break;
        }
    }
}
