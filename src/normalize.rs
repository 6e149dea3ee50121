//! Record normalization.
//!
//! Turns rows of the six-column source file into [`Record`]s. Field parsing
//! is best-effort and total: a value that does not parse is replaced by its
//! default (`0.0`, `0`, or [`BarDate::Unparseable`]) and the row is kept, so
//! the number of records out always equals the number of rows in.
//!
//! Only the header is validated strictly: it must have exactly six columns,
//! checked before any row is read.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IngestError;
use crate::models::{BarDate, Record, COLUMNS};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse a calendar date, keeping only the date part of date-time values.
pub fn parse_date(raw: &str) -> BarDate {
    let s = raw.trim();
    if s.is_empty() {
        return BarDate::Unparseable;
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return BarDate::Day(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return BarDate::Day(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return BarDate::Day(dt.date_naive());
    }
    BarDate::Unparseable
}

/// Parse a price. Anything that is not a finite number becomes `0.0`.
pub fn parse_price(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Parse a share volume. Decimal forms are truncated; negatives become `0`.
pub fn parse_volume(raw: &str) -> u64 {
    let s = raw.trim();
    if let Ok(v) = s.parse::<u64>() {
        return v;
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v.trunc() as u64,
        _ => 0,
    }
}

/// Normalize one positional row. Missing trailing fields take their defaults
/// and extra fields are ignored.
pub fn normalize_row(fields: &[&str]) -> Record {
    let field = |i: usize| fields.get(i).copied().unwrap_or("");
    Record {
        date: parse_date(field(0)),
        close: parse_price(field(1)),
        high: parse_price(field(2)),
        low: parse_price(field(3)),
        open: parse_price(field(4)),
        volume: parse_volume(field(5)),
    }
}

fn normalize_byte_record(row: &csv::ByteRecord) -> Record {
    // A field that is not UTF-8 is treated like any other unparseable value.
    let fields: Vec<&str> = row
        .iter()
        .map(|b| std::str::from_utf8(b).unwrap_or(""))
        .collect();
    normalize_row(&fields)
}

/// Counters gathered while reading the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub rows: u64,
    pub unparseable_dates: u64,
}

impl SourceStats {
    fn observe(&mut self, record: &Record) {
        self.rows += 1;
        if record.date.is_unparseable() {
            self.unparseable_dates += 1;
        }
    }
}

/// A source file whose header has been validated.
pub struct SourceReader {
    path: PathBuf,
    reader: csv::Reader<Box<dyn Read + Send>>,
}

impl SourceReader {
    /// Open `path` and check the header has the fixed six-column layout.
    ///
    /// Header names are not compared; columns are mapped by position.
    pub fn open(path: &Path, delimiter: u8) -> Result<Self, IngestError> {
        let file = File::open(path).map_err(|e| IngestError::Source {
            path: path.to_path_buf(),
            source: csv::Error::from(e),
        })?;
        Self::from_reader(path, Box::new(file), delimiter)
    }

    /// Like [`open`](Self::open), over any byte stream. `path` only labels
    /// errors.
    pub fn from_reader(
        path: &Path,
        input: Box<dyn Read + Send>,
        delimiter: u8,
    ) -> Result<Self, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let width = reader
            .byte_headers()
            .map_err(|e| IngestError::Source {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();

        if width != COLUMNS.len() {
            return Err(IngestError::InvalidSource {
                path: path.to_path_buf(),
                reason: format!(
                    "expected {} columns ({}), found {}",
                    COLUMNS.len(),
                    COLUMNS.join(", "),
                    width
                ),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next row, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<Record>, IngestError> {
        let mut row = csv::ByteRecord::new();
        match self.reader.read_byte_record(&mut row) {
            Ok(true) => Ok(Some(normalize_byte_record(&row))),
            Ok(false) => Ok(None),
            Err(e) => Err(IngestError::Source {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Read the remaining rows into memory.
    pub fn read_all(mut self) -> Result<(Vec<Record>, SourceStats), IngestError> {
        let mut records = Vec::new();
        let mut stats = SourceStats::default();
        while let Some(record) = self.next_record()? {
            stats.observe(&record);
            records.push(record);
        }
        Ok((records, stats))
    }
}

/// Convenience wrapper: open, validate, and normalize a whole file.
pub fn normalize_file(path: &Path, delimiter: u8) -> Result<Vec<Record>, IngestError> {
    SourceReader::open(path, delimiter)?
        .read_all()
        .map(|(records, _)| records)
}

/// What the producer task saw before it stopped.
#[derive(Debug)]
pub struct SourceReport {
    pub stats: SourceStats,
    /// Read error that ended the stream early, if any. Rows counted in
    /// `stats` were all sent.
    pub error: Option<IngestError>,
}

/// Stream records into a bounded channel from a blocking reader task.
///
/// The channel applies backpressure, so the file is only read as fast as
/// the loader consumes it. The task ends early if the receiver is dropped
/// or a read fails; either way the channel closes and the report says why.
pub fn spawn_producer(
    mut source: SourceReader,
    capacity: usize,
) -> (mpsc::Receiver<Record>, JoinHandle<SourceReport>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = tokio::task::spawn_blocking(move || {
        let mut stats = SourceStats::default();
        loop {
            match source.next_record() {
                Ok(Some(record)) => {
                    stats.observe(&record);
                    if tx.blocking_send(record).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return SourceReport {
                        stats,
                        error: Some(e),
                    }
                }
            }
        }
        SourceReport { stats, error: None }
    });
    (rx, handle)
}
