//! # Bar Loader
//!
//! Bulk-loads daily price bars (date, close, high, low, open, volume) from a
//! delimited file into an Elasticsearch-compatible document store, and reads
//! them back for charting.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  mpsc   ┌─────────────┐  _bulk x N  ┌──────────┐
//! │ Normalizer │───────▶│ Bulk Loader  │───────────▶│  Store    │
//! │ CSV → bars │         │ chunk+fanout │             │ (HTTP)    │
//! └────────────┘         └──────┬──────┘             └────┬─────┘
//!                               │ outcomes                 │
//!                               ▼                          ▼
//!                        ┌────────────┐             ┌──────────┐
//!                        │  summary   │             │  query   │
//!                        └────────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bars ping                     # check the store answers
//! bars load --dry-run           # normalize only, no store writes
//! bars load                     # provision + full reload
//! bars query --limit 1000       # read back, sorted by date
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, documents, schema, outcomes |
//! | [`normalize`] | Source parsing and field coercion |
//! | [`provision`] | Idempotent collection creation |
//! | [`loader`] | Connection retry and concurrent bulk submission |
//! | [`ingest`] | End-to-end run orchestration |
//! | [`store`] | Store trait, HTTP and in-memory backends |
//! | [`query`] | Date-sorted read-back |
//! | [`progress`] | Load progress reporting |
//! | [`error`] | Typed errors |

pub mod config;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod provision;
pub mod query;
pub mod store;
