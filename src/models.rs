//! Core data models used throughout the loader.
//!
//! These types represent the cleaned price bars, the documents they become
//! on the way into the store, the collection schema, and the per-document
//! outcomes that flow back out of a bulk load.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical column order of the source file.
pub const COLUMNS: [&str; 6] = ["date", "close", "high", "low", "open", "volume"];

/// Calendar date of a bar, or the sentinel for a value that did not parse.
///
/// Serialized as an ISO date string, or `null` for [`BarDate::Unparseable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<NaiveDate>", into = "Option<NaiveDate>")]
pub enum BarDate {
    Day(NaiveDate),
    Unparseable,
}

impl BarDate {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            BarDate::Day(d) => Some(*d),
            BarDate::Unparseable => None,
        }
    }

    pub fn is_unparseable(&self) -> bool {
        matches!(self, BarDate::Unparseable)
    }
}

impl From<Option<NaiveDate>> for BarDate {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map(BarDate::Day).unwrap_or(BarDate::Unparseable)
    }
}

impl From<BarDate> for Option<NaiveDate> {
    fn from(value: BarDate) -> Self {
        value.as_date()
    }
}

impl fmt::Display for BarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarDate::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            BarDate::Unparseable => f.write_str("<unparseable>"),
        }
    }
}

/// One cleaned row of the source table. All six fields are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: BarDate,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub volume: u64,
}

/// A record addressed to a collection under a freshly generated id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub record: Record,
}

impl Document {
    /// Wrap a record with a new UUID v4. Ids are never derived from content.
    pub fn new(collection: &str, record: Record) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.to_string(),
            record,
        }
    }
}

/// Field types understood by the store schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Date,
    Float,
    Integer,
}

/// Field name → type mapping declared once per collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub fields: Vec<(String, FieldType)>,
}

impl SchemaDescriptor {
    /// The schema of a daily price bar collection.
    pub fn price_bars() -> Self {
        let types = [
            FieldType::Date,
            FieldType::Float,
            FieldType::Float,
            FieldType::Float,
            FieldType::Float,
            FieldType::Integer,
        ];
        Self {
            fields: COLUMNS
                .iter()
                .zip(types)
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        }
    }
}

/// Result of submitting one document.
///
/// `diagnostic` is the store's opaque error payload and is only set on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    pub id: String,
    pub success: bool,
    pub diagnostic: Option<serde_json::Value>,
}

impl DocumentOutcome {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            diagnostic: None,
        }
    }

    pub fn failed(id: impl Into<String>, diagnostic: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: false,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Optional narrowing of a store query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    All,
    /// Exact match on a single field.
    Term { field: String, value: serde_json::Value },
}

/// Lifecycle of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotConnected,
    Connecting,
    Connected,
    Provisioning,
    Provisioned,
    Loading,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::NotConnected => "not_connected",
            RunState::Connecting => "connecting",
            RunState::Connected => "connected",
            RunState::Provisioning => "provisioning",
            RunState::Provisioned => "provisioned",
            RunState::Loading => "loading",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}
