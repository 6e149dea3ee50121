//! `ElasticStore` against a mock Elasticsearch served by axum.
//!
//! The mock implements just enough of the REST surface for the loader:
//! `GET /`, `HEAD|PUT /{index}`, `POST /_bulk` and `POST /{index}/_search`.
//! Documents whose source has a null `date` are rejected per item, the way
//! a strict mapping would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, head, post},
    Json, Router,
};
use bar_loader::config::{Config, IndexConfig, LoadConfig, SourceConfig, StoreConfig};
use bar_loader::error::StoreError;
use bar_loader::ingest::run_load_with_store;
use bar_loader::loader::connect_elastic;
use bar_loader::models::{QueryFilter, SchemaDescriptor};
use bar_loader::progress::NoProgress;
use bar_loader::provision::ensure_schema;
use bar_loader::query::fetch_series;
use bar_loader::store::{ElasticStore, SearchStore};
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Mock server ────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    indices: HashMap<String, Value>,
    docs: HashMap<String, Vec<(String, Value)>>,
    bulk_requests: usize,
}

type Shared = Arc<Mutex<MockState>>;

async fn root() -> Json<Value> {
    Json(json!({ "name": "mock", "tagline": "You Know, for Search" }))
}

async fn index_exists(State(state): State<Shared>, Path(index): Path<String>) -> StatusCode {
    if state.lock().unwrap().indices.contains_key(&index) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_index(
    State(state): State<Shared>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.indices.contains_key(&index) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": { "type": "resource_already_exists_exception",
                           "reason": format!("index [{}] already exists", index) },
                "status": 400
            })),
        )
            .into_response();
    }
    state.indices.insert(index.clone(), body);
    Json(json!({ "acknowledged": true, "index": index })).into_response()
}

async fn bulk(State(state): State<Shared>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body).to_string();
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();

    let mut state = state.lock().unwrap();
    state.bulk_requests += 1;
    let mut items = Vec::new();
    let mut errors = false;
    for pair in lines.chunks(2) {
        let action: Value = serde_json::from_str(pair[0]).unwrap();
        let source: Value = serde_json::from_str(pair[1]).unwrap();
        let index = action["index"]["_index"].as_str().unwrap().to_string();
        let id = action["index"]["_id"].as_str().unwrap().to_string();
        if source["date"].is_null() {
            errors = true;
            items.push(json!({ "index": {
                "_index": index, "_id": id, "status": 400,
                "error": { "type": "mapper_parsing_exception", "reason": "date is null" }
            }}));
        } else {
            state.docs.entry(index.clone()).or_default().push((id.clone(), source));
            items.push(json!({ "index": { "_index": index, "_id": id, "status": 201 } }));
        }
    }
    Json(json!({ "took": 1, "errors": errors, "items": items })).into_response()
}

async fn search(
    State(state): State<Shared>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let state = state.lock().unwrap();
    let Some(docs) = state.docs.get(&index) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "type": "index_not_found_exception" } })),
        )
            .into_response();
    };
    let size = body["size"].as_u64().unwrap_or(10) as usize;
    // Reverse insertion order so callers cannot rely on hit order.
    let hits: Vec<Value> = docs
        .iter()
        .rev()
        .take(size)
        .map(|(id, source)| json!({ "_index": index, "_id": id, "_source": source }))
        .collect();
    Json(json!({ "hits": { "total": { "value": docs.len() }, "hits": hits } })).into_response()
}

async fn spawn_mock() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let app = Router::new()
        .route("/", get(root))
        .route("/_bulk", post(bulk))
        .route("/{index}", head(index_exists).put(create_index))
        .route("/{index}/_search", post(search))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn store_config(url: &str) -> StoreConfig {
    StoreConfig {
        url: url.to_string(),
        timeout_secs: 5,
        max_retries: 2,
        retry_delay_secs: 0,
        username: None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_and_provision_round_trip() {
    let (url, state) = spawn_mock().await;
    let conn = connect_elastic(&store_config(&url)).await.unwrap();

    let schema = SchemaDescriptor::price_bars();
    assert!(ensure_schema(conn.store(), "stock_data", &schema).await.unwrap());
    assert!(!ensure_schema(conn.store(), "stock_data", &schema).await.unwrap());

    let state = state.lock().unwrap();
    let mapping = &state.indices["stock_data"]["mappings"]["properties"];
    assert_eq!(mapping["date"]["type"], "date");
    assert_eq!(mapping["volume"]["type"], "long");
}

#[tokio::test]
async fn create_on_existing_index_maps_to_already_exists() {
    let (url, _state) = spawn_mock().await;
    let store = ElasticStore::new(&store_config(&url)).unwrap();
    let schema = SchemaDescriptor::price_bars();
    store.create_collection("stock_data", &schema).await.unwrap();

    let err = store
        .create_collection("stock_data", &schema)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(name) if name == "stock_data"));
}

#[tokio::test]
async fn full_load_then_sorted_read_back() {
    let (url, state) = spawn_mock().await;
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("stock_data.csv");
    std::fs::write(
        &source,
        "Date,Close,High,Low,Open,Volume\n\
         2023-01-05,126.36,127.77,124.76,127.13,80962700\n\
         2023-01-03,125.07,130.90,124.17,130.28,112117500\n\
         bad-date,abc,10.5,,5.0,not-a-number\n\
         2023-01-04,126.36,128.66,125.08,126.89,89113600\n",
    )
    .unwrap();

    let cfg = Config {
        store: store_config(&url),
        index: IndexConfig {
            name: "stock_data".to_string(),
        },
        source: SourceConfig {
            path: source,
            delimiter: ",".to_string(),
        },
        load: LoadConfig {
            batch_size: 2,
            workers: 2,
            channel_capacity: 8,
        },
    };

    let store: Arc<dyn SearchStore> = Arc::new(ElasticStore::new(&cfg.store).unwrap());
    let summary = run_load_with_store(&cfg, store.clone(), &NoProgress)
        .await
        .unwrap();

    assert!(summary.created);
    assert_eq!(summary.attempted, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.chunks, 2);
    assert_eq!(state.lock().unwrap().bulk_requests, 2);

    let series = fetch_series(store.as_ref(), "stock_data", 1000).await.unwrap();
    let dates: Vec<String> = series.iter().map(|r| r.date.to_string()).collect();
    assert_eq!(dates, vec!["2023-01-03", "2023-01-04", "2023-01-05"]);
    assert_eq!(series[0].volume, 112_117_500);
}

#[tokio::test]
async fn query_unknown_index_is_a_status_error() {
    let (url, _state) = spawn_mock().await;
    let store = ElasticStore::new(&store_config(&url)).unwrap();
    let err = store
        .query("missing", &QueryFilter::All, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 404, .. }));
}

#[tokio::test]
async fn unreachable_store_exhausts_retries() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = connect_elastic(&store_config(&format!("http://{}", addr)))
        .await
        .err()
        .unwrap();
    let message = err.to_string();
    assert!(message.contains("after 2 attempt(s)"), "{}", message);
}
