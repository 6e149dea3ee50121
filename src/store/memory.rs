//! In-memory [`SearchStore`] implementation for testing.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Documents are
//! keyed by id within a collection, so re-submitting an id overwrites, as an
//! index request does. Failures can be injected at each seam the pipeline
//! cares about: liveness probes, whole chunks, and single documents.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::StoreError;
use crate::models::{Document, DocumentOutcome, QueryFilter, SchemaDescriptor};

use super::SearchStore;

type Rejector = Box<dyn Fn(&Document) -> Option<String> + Send + Sync>;

/// In-memory store for tests.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, SchemaDescriptor>>,
    docs: RwLock<HashMap<String, HashMap<String, Document>>>,
    /// Collections that another provisioner creates between our existence
    /// check and our create call.
    racing_creators: RwLock<HashSet<String>>,
    ping_failures: AtomicU32,
    ping_calls: AtomicU32,
    chunk_failures: AtomicU32,
    bulk_sizes: Mutex<Vec<usize>>,
    bulk_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    rejector: Option<Rejector>,
}

/// Counts one bulk request as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            docs: RwLock::new(HashMap::new()),
            racing_creators: RwLock::new(HashSet::new()),
            ping_failures: AtomicU32::new(0),
            ping_calls: AtomicU32::new(0),
            chunk_failures: AtomicU32::new(0),
            bulk_sizes: Mutex::new(Vec::new()),
            bulk_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            rejector: None,
        }
    }

    /// Fail the first `n` liveness probes.
    pub fn with_failing_pings(self, n: u32) -> Self {
        self.ping_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the first `n` bulk requests as a whole.
    pub fn with_failing_chunks(self, n: u32) -> Self {
        self.chunk_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Hold every bulk request open for `delay` before answering.
    pub fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.bulk_delay = Some(delay);
        self
    }

    /// Reject single documents: `Some(reason)` fails the item.
    pub fn reject_where<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> Option<String> + Send + Sync + 'static,
    {
        self.rejector = Some(Box::new(f));
        self
    }

    /// Make `name` appear absent to the existence check while a create call
    /// finds it already present.
    pub fn with_racing_creator(self, name: &str) -> Self {
        self.racing_creators
            .write()
            .unwrap()
            .insert(name.to_string());
        self
    }

    pub fn ping_calls(&self) -> u32 {
        self.ping_calls.load(Ordering::SeqCst)
    }

    /// Most bulk requests ever open at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sizes of every bulk request received, in arrival order.
    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.lock().unwrap().clone()
    }

    pub fn schema(&self, collection: &str) -> Option<SchemaDescriptor> {
        self.collections.read().unwrap().get(collection).cloned()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.docs
            .read()
            .unwrap()
            .get(collection)
            .map(|d| d.len())
            .unwrap_or(0)
    }

    pub fn document_ids(&self, collection: &str) -> HashSet<String> {
        self.docs
            .read()
            .unwrap()
            .get(collection)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed documents directly, bypassing the bulk path.
    pub fn insert(&self, doc: Document) {
        self.docs
            .write()
            .unwrap()
            .entry(doc.collection.clone())
            .or_default()
            .insert(doc.id.clone(), doc);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrement `counter` if positive. Returns whether it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl SearchStore for InMemoryStore {
    async fn ping(&self) -> Result<bool, StoreError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!take_one(&self.ping_failures))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        if self.racing_creators.read().unwrap().contains(name) {
            return Ok(false);
        }
        Ok(self.collections.read().unwrap().contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &SchemaDescriptor,
    ) -> Result<(), StoreError> {
        if self.racing_creators.write().unwrap().remove(name) {
            self.collections
                .write()
                .unwrap()
                .insert(name.to_string(), schema.clone());
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        let mut collections = self.collections.write().unwrap();
        if collections.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        collections.insert(name.to_string(), schema.clone());
        Ok(())
    }

    async fn bulk_submit(&self, chunk: &[Document]) -> Result<Vec<DocumentOutcome>, StoreError> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.bulk_sizes.lock().unwrap().push(chunk.len());
        if let Some(delay) = self.bulk_delay {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.chunk_failures) {
            return Err(StoreError::Status {
                status: 503,
                body: "injected chunk failure".to_string(),
            });
        }

        let mut docs = self.docs.write().unwrap();
        let outcomes = chunk
            .iter()
            .map(|doc| {
                let rejection = self.rejector.as_ref().and_then(|f| f(doc));
                match rejection {
                    Some(reason) => DocumentOutcome::failed(
                        &doc.id,
                        json!({ "type": "mapper_parsing_exception", "reason": reason }),
                    ),
                    None => {
                        docs.entry(doc.collection.clone())
                            .or_default()
                            .insert(doc.id.clone(), doc.clone());
                        DocumentOutcome::ok(&doc.id)
                    }
                }
            })
            .collect();
        Ok(outcomes)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.read().unwrap();
        let Some(stored) = docs.get(collection) else {
            return Err(StoreError::Status {
                status: 404,
                body: format!("no such index [{}]", collection),
            });
        };

        let mut hits = Vec::new();
        for doc in stored.values() {
            if hits.len() >= limit {
                break;
            }
            let keep = match filter {
                QueryFilter::All => true,
                QueryFilter::Term { field, value } => {
                    serde_json::to_value(&doc.record)?.get(field) == Some(value)
                }
            };
            if keep {
                hits.push(doc.clone());
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BarDate, Record};

    fn doc(volume: u64) -> Document {
        Document::new(
            "bars",
            Record {
                date: BarDate::Unparseable,
                close: 1.0,
                high: 1.0,
                low: 1.0,
                open: 1.0,
                volume,
            },
        )
    }

    #[tokio::test]
    async fn failing_pings_count_down() {
        let store = InMemoryStore::new().with_failing_pings(2);
        assert!(!store.ping().await.unwrap());
        assert!(!store.ping().await.unwrap());
        assert!(store.ping().await.unwrap());
        assert_eq!(store.ping_calls(), 3);
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let store = InMemoryStore::new();
        let schema = SchemaDescriptor::price_bars();
        store.create_collection("bars", &schema).await.unwrap();
        let err = store.create_collection("bars", &schema).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn rejector_fails_single_items() {
        let store = InMemoryStore::new()
            .reject_where(|d| (d.record.volume == 0).then(|| "zero volume".to_string()));
        let chunk = vec![doc(1), doc(0), doc(2)];
        let outcomes = store.bulk_submit(&chunk).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].diagnostic.as_ref().unwrap()["reason"], "zero volume");
        assert_eq!(store.document_count("bars"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_gauge_tracks_overlap() {
        let store = InMemoryStore::new().with_bulk_delay(Duration::from_millis(10));
        let a = vec![doc(1)];
        let b = vec![doc(2)];
        let (ra, rb) = tokio::join!(store.bulk_submit(&a), store.bulk_submit(&b));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(store.max_in_flight(), 2);

        store.bulk_submit(&a).await.unwrap();
        assert_eq!(store.max_in_flight(), 2);
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn term_query_filters() {
        let store = InMemoryStore::new();
        store.insert(doc(7));
        store.insert(doc(8));
        let filter = QueryFilter::Term {
            field: "volume".to_string(),
            value: json!(7),
        };
        let hits = store.query("bars", &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.volume, 7);
    }

    #[tokio::test]
    async fn query_missing_collection_errors() {
        let store = InMemoryStore::new();
        assert!(store.query("nope", &QueryFilter::All, 10).await.is_err());
    }
}
