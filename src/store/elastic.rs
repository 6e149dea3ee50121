//! [`SearchStore`] backed by an Elasticsearch-compatible HTTP API.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | ping | `GET /` |
//! | collection_exists | `HEAD /{index}` |
//! | create_collection | `PUT /{index}` with a mappings body |
//! | bulk_submit | `POST /_bulk` (NDJSON) |
//! | query | `POST /{index}/_search` |
//!
//! Basic authentication is used when `store.username` is set; the password
//! comes from the `BARS_STORE_PASSWORD` environment variable.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{Document, DocumentOutcome, FieldType, QueryFilter, Record, SchemaDescriptor};

use super::SearchStore;

/// Environment variable holding the basic-auth password.
pub const PASSWORD_ENV: &str = "BARS_STORE_PASSWORD";

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

pub struct ElasticStore {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: std::env::var(PASSWORD_ENV).ok(),
        })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }
}

async fn status_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Status { status, body }
}

fn field_type_name(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Date => "date",
        FieldType::Float => "float",
        // Share volumes overflow a 32-bit `integer`.
        FieldType::Integer => "long",
    }
}

/// Render a schema as an index-creation body.
pub fn mapping_body(schema: &SchemaDescriptor) -> Value {
    let properties: serde_json::Map<String, Value> = schema
        .fields
        .iter()
        .map(|(name, ty)| (name.clone(), json!({ "type": field_type_name(*ty) })))
        .collect();
    json!({ "mappings": { "properties": properties } })
}

/// Render a chunk as a `_bulk` NDJSON body: one action line and one source
/// line per document, newline-terminated.
pub fn bulk_body(chunk: &[Document]) -> Result<String, StoreError> {
    let mut body = String::new();
    for doc in chunk {
        let action = json!({ "index": { "_index": doc.collection, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Map a `_bulk` response onto the submitted chunk, in chunk order.
///
/// Items the response does not mention are reported as failed.
pub fn parse_bulk_response(
    chunk: &[Document],
    json: &Value,
) -> Result<Vec<DocumentOutcome>, StoreError> {
    let items = json
        .get("items")
        .and_then(|i| i.as_array())
        .ok_or_else(|| StoreError::Response("bulk response missing items array".to_string()))?;

    let mut by_id: HashMap<&str, &Value> = HashMap::with_capacity(items.len());
    for item in items {
        // Each item is keyed by its action name ("index", "create", ...).
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        if let Some(id) = result.get("_id").and_then(|v| v.as_str()) {
            by_id.insert(id, result);
        }
    }

    let outcomes = chunk
        .iter()
        .map(|doc| match by_id.get(doc.id.as_str()) {
            Some(result) => {
                let status = result.get("status").and_then(|s| s.as_u64()).unwrap_or(0);
                match result.get("error") {
                    Some(error) => DocumentOutcome::failed(&doc.id, error.clone()),
                    None if (200..300).contains(&status) => DocumentOutcome::ok(&doc.id),
                    None => DocumentOutcome::failed(&doc.id, json!({ "status": status })),
                }
            }
            None => DocumentOutcome::failed(
                &doc.id,
                json!({ "reason": "document missing from bulk response" }),
            ),
        })
        .collect();
    Ok(outcomes)
}

/// Turn `_search` hits back into documents.
pub fn parse_search_hits(collection: &str, json: &Value) -> Result<Vec<Document>, StoreError> {
    let hits = json
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .ok_or_else(|| StoreError::Response("search response missing hits.hits".to_string()))?;

    let mut docs = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Response("search hit missing _id".to_string()))?;
        let source = hit
            .get("_source")
            .cloned()
            .ok_or_else(|| StoreError::Response(format!("search hit {} missing _source", id)))?;
        let record: Record = serde_json::from_value(source)?;
        docs.push(Document {
            id: id.to_string(),
            collection: hit
                .get("_index")
                .and_then(|v| v.as_str())
                .unwrap_or(collection)
                .to_string(),
            record,
        });
    }
    Ok(docs)
}

fn query_body(filter: &QueryFilter, limit: usize) -> Value {
    let query = match filter {
        QueryFilter::All => json!({ "match_all": {} }),
        QueryFilter::Term { field, value } => {
            let mut term = serde_json::Map::new();
            term.insert(field.clone(), value.clone());
            json!({ "term": term })
        }
    };
    json!({ "size": limit, "query": query })
}

#[async_trait]
impl SearchStore for ElasticStore {
    async fn ping(&self) -> Result<bool, StoreError> {
        let response = self.request(Method::GET, "").send().await?;
        Ok(response.status().is_success())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self.request(Method::HEAD, name).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &SchemaDescriptor,
    ) -> Result<(), StoreError> {
        let response = self
            .request(Method::PUT, name)
            .json(&mapping_body(schema))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let error_type = serde_json::from_str::<Value>(&body).ok().and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("type"))
                .and_then(|t| t.as_str())
                .map(str::to_string)
        });
        if error_type.as_deref() == Some(ALREADY_EXISTS) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn bulk_submit(&self, chunk: &[Document]) -> Result<Vec<DocumentOutcome>, StoreError> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .request(Method::POST, "_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(bulk_body(chunk)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: Value = response.json().await?;
        parse_bulk_response(chunk, &json)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let response = self
            .request(Method::POST, &format!("{}/_search", collection))
            .json(&query_body(filter, limit))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: Value = response.json().await?;
        parse_search_hits(collection, &json)
    }
}
