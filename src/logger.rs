//! Structured logging for flowsift.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to a
//! log file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON), making it easy to ingest into log
//! shippers and SIEM platforms.
//!
//! All public functions are intentionally cheap — they take a shared
//! reference to the logger and do a single allocation per event for the
//! formatted string.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds that flowsift can emit.
///
/// Each variant carries exactly the fields needed to describe that event.
/// The `#[serde(tag = "event")]` attribute ensures JSON output includes an
/// `"event"` key so consumers can filter by type without inspecting
/// structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// A capture source was opened and its filter applied.
    CaptureStarted { source: &'a str, filter: &'a str },

    /// A batch of completed windows was appended to the output artifact.
    RecordsFlushed { count: usize },

    /// Session summary emitted on shutdown.
    SessionSummary {
        duration_secs:   u64,
        packets_total:   u64,
        packets_skipped: u64,
        bytes_total:     u64,
        records_written: u64,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every
/// module that needs to emit events. The internal `Mutex` serialises writes
/// so that output lines are never interleaved across threads.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json: bool,
    /// Optional buffered file writer. `None` when `--log-file` was not given.
    file: Option<Mutex<BufWriter<std::fs::File>>>,
}

/// Type alias used throughout the codebase for convenience.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `log_path` - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, file })
    }

    /// Logs a single [`Event`], writing to stdout and optionally to the log file.
    ///
    /// Plain-text output is prefixed with a timestamp and the event tag.
    /// NDJSON output is a single JSON object per line with a `"timestamp"`
    /// field injected alongside the event fields.
    pub fn log(&self, event: &Event) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let line = if self.json {
            // Serialise the event to a JSON Value so we can inject the timestamp.
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert(
                    "timestamp".to_string(),
                    serde_json::Value::String(timestamp.clone()),
                );
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            // Plain-text: "[TIMESTAMP] [TAG] human-readable description"
            format!("[{}] {}", timestamp, self.plain_text(event))
        };

        // Always write to stdout.
        println!("{}", line);

        // If a log file was configured, also write there.
        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
    fn plain_text(&self, event: &Event) -> String {
        match event {
            Event::Info { message } =>
                format!("[INFO] {}", message),

            Event::CaptureStarted { source, filter } =>
                format!("[CAPTURE] {} | filter: {}", source, filter),

            Event::RecordsFlushed { count } =>
                format!("[FLUSH] {} window(s) written", count),

            Event::SessionSummary {
                duration_secs, packets_total, packets_skipped, bytes_total, records_written
            } => format!(
                "[SUMMARY] duration={}s packets={} skipped={} bytes={} records={}",
                duration_secs, packets_total, packets_skipped, bytes_total, records_written
            ),
        }
    }
}
