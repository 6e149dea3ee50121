//! Document store abstraction.
//!
//! The [`SearchStore`] trait is everything the pipeline and the downstream
//! reader need from the search engine, enabling pluggable backends:
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`ElasticStore`] | Elasticsearch-compatible HTTP API |
//! | [`InMemoryStore`] | Tests, with failure injection |
//!
//! Implementations must be `Send + Sync`: one handle is shared read-only by
//! every bulk worker.

pub mod elastic;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Document, DocumentOutcome, QueryFilter, SchemaDescriptor};

pub use elastic::ElasticStore;
pub use memory::InMemoryStore;

/// Abstract search-engine backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](SearchStore::ping) | Liveness probe |
/// | [`collection_exists`](SearchStore::collection_exists) | Existence check |
/// | [`create_collection`](SearchStore::create_collection) | Create with schema |
/// | [`bulk_submit`](SearchStore::bulk_submit) | Index a chunk of documents |
/// | [`query`](SearchStore::query) | Bounded, unordered retrieval |
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Returns `true` when the store is reachable and healthy.
    async fn ping(&self) -> Result<bool, StoreError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Create `name` with `schema`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the collection is present.
    async fn create_collection(&self, name: &str, schema: &SchemaDescriptor)
        -> Result<(), StoreError>;

    /// Index a chunk of documents in one request.
    ///
    /// On `Ok`, returns exactly one outcome per input document. An `Err`
    /// means the request as a whole failed and nothing is known per item.
    async fn bulk_submit(&self, chunk: &[Document]) -> Result<Vec<DocumentOutcome>, StoreError>;

    /// Fetch at most `limit` documents. No ordering is guaranteed.
    async fn query(
        &self,
        collection: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;
}
