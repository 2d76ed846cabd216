//! Append-only CSV sink for flushed flow records.
//!
//! The output artifact is the durable interface to the downstream scorer:
//! the header row is written exactly once (only when the target file is
//! newly created or empty), records are appended batch by batch, and the
//! writer is flushed after every batch so a reader can observe completed
//! windows while capture is still in progress. The header is also written
//! at open time rather than lazily, so an interrupted capture that never
//! completed a window still leaves a parseable file behind.

use crate::pipeline::types::FlowRecord;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// CSV column order. [`FlowRecord`] serializes its fields positionally in
/// this same order.
pub const HEADER: [&str; 10] = [
    "timestamp",
    "bytes_transferred",
    "packet_count",
    "connection_duration",
    "source_port",
    "destination_port",
    "retransmission_rate",
    "protocol",
    "bytes_per_packet",
    "packets_per_second",
];

/// Durable, append-mode CSV writer.
///
/// Opened once before any packets are consumed (a bad output path is a
/// fatal, fail-fast error) and closed on every exit path. Dropping the
/// sink flushes any buffered rows.
#[derive(Debug)]
pub struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    /// Opens (or creates) the output artifact for appending.
    ///
    /// Parent directories are created as needed. When the file is new or
    /// empty the header row is written and flushed immediately.
    ///
    /// # Errors
    /// Returns a descriptive error naming the output path when the file or
    /// its parent directory cannot be created.
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    format!("Cannot create output directory '{}': {}", parent.display(), e)
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Cannot open output file '{}': {}", path.display(), e))?;

        // Appending to a non-empty file must never duplicate the header.
        let write_header = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|e| format!("Cannot stat output file '{}': {}", path.display(), e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if write_header {
            writer
                .write_record(HEADER)
                .and_then(|()| writer.flush().map_err(Into::into))
                .map_err(|e| format!("Cannot write header to '{}': {}", path.display(), e))?;
        }

        Ok(Self { writer })
    }

    /// Appends a batch of records and flushes them to stable storage.
    ///
    /// Called once per watermark flush and once for the terminal drain;
    /// after it returns, every record in the batch survives interruption.
    pub fn append(&mut self, records: &[FlowRecord]) -> Result<(), String> {
        for record in records {
            self.writer
                .serialize(record)
                .map_err(|e| format!("Cannot write flow record: {}", e))?;
        }
        self.writer
            .flush()
            .map_err(|e| format!("Cannot flush output file: {}", e))
    }

    /// Final flush on the normal shutdown path.
    ///
    /// Dropping the sink would also flush, but doing it explicitly lets the
    /// error surface instead of being swallowed by `Drop`.
    pub fn close(mut self) -> Result<(), String> {
        self.writer
            .flush()
            .map_err(|e| format!("Cannot flush output file: {}", e))
    }
}
