//! Load progress reporting.
//!
//! Reports observable progress during `bars load` so operators see how many
//! documents have been submitted and how many failed while a long file is
//! streaming. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single progress event for a load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadProgressEvent {
    /// The source file is open and rows are being streamed. Total unknown.
    Reading { source: String },
    /// `submitted` documents have settled so far, `failed` of them rejected.
    Loading {
        collection: String,
        submitted: u64,
        failed: u64,
    },
}

/// Reports load progress. Implementations write to stderr (human or JSON).
pub trait LoadProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the load pipeline.
    fn report(&self, event: LoadProgressEvent);
}

/// Human-friendly progress on stderr: "load stock_data  1,250 documents  (3 failed)".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: LoadProgressEvent) {
        let line = match &event {
            LoadProgressEvent::Reading { source } => {
                format!("load  reading {}...\n", source)
            }
            LoadProgressEvent::Loading {
                collection,
                submitted,
                failed,
            } => format!(
                "load {}  {} documents  ({} failed)\n",
                collection,
                format_number(*submitted),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: LoadProgressEvent) {
        let obj = match &event {
            LoadProgressEvent::Reading { source } => serde_json::json!({
                "event": "progress",
                "phase": "reading",
                "source": source
            }),
            LoadProgressEvent::Loading {
                collection,
                submitted,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "collection": collection,
                "submitted": submitted,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: LoadProgressEvent) {}
}

/// Thousands-separated count for human output.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn LoadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
