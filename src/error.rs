//! Typed error taxonomy for the ingestion pipeline.
//!
//! Only run-level failures live in [`IngestError`]. Per-field parse problems
//! are coerced by the normalizer and per-document rejections travel in the
//! outcome stream, so neither shows up here.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by a [`SearchStore`](crate::store::SearchStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collection was already present when we tried to create it.
    #[error("collection '{0}' already exists")]
    AlreadyExists(String),

    /// The store answered, but not with something we can use.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected store response: {0}")]
    Response(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal errors that abort an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The liveness probe never succeeded within the retry budget.
    #[error("could not reach store at {url} after {attempts} attempt(s): {reason}")]
    Connection {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The source header does not have the fixed six-column layout.
    #[error("invalid source '{path}': {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    #[error("failed to read source '{path}': {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
