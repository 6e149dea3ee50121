//! Index provisioning.
//!
//! Makes sure the target collection exists with the price-bar schema before
//! any document is submitted. An existing collection is left untouched: its
//! mapping is neither compared nor migrated.

use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::SchemaDescriptor;
use crate::store::SearchStore;

/// Create `collection` with `schema` unless it already exists.
///
/// Returns `true` if this call created the collection. A concurrent creator
/// winning the race between the existence check and the create call is not
/// an error: the store's "already exists" answer yields `false`.
pub async fn ensure_schema(
    store: &dyn SearchStore,
    collection: &str,
    schema: &SchemaDescriptor,
) -> Result<bool, StoreError> {
    if store.collection_exists(collection).await? {
        debug!(collection, "collection already present; schema left untouched");
        return Ok(false);
    }

    match store.create_collection(collection, schema).await {
        Ok(()) => {
            info!(collection, fields = schema.fields.len(), "collection created");
            Ok(true)
        }
        Err(StoreError::AlreadyExists(_)) => {
            debug!(collection, "collection created concurrently");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
