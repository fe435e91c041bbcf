//! Evidence and Diagnostics sinks: append-only JSONL writers on two planes.
//!
//! Each owned by a single writer task with a bounded message queue;
//! sessions enqueue records and never touch the file directly. Size-based
//! rotation keeps a bounded number of
//! historical files and marks each rotation boundary with a tombstone
//! record so a reader scanning the active file can tell a gap was
//! deliberate, not corruption.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Outer record wrapper written to both planes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkRecord {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub event: String,
    pub data: serde_json::Value,
}

impl SinkRecord {
    #[must_use]
    pub fn new(label: impl Into<String>, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            label: label.into(),
            event: event.into(),
            data,
        }
    }
}

struct WriterState {
    writer: BufWriter<File>,
    written_bytes: u64,
}

/// Append-only JSONL writer with size-based rotation.
///
/// Writes are line-atomic: the full line is formatted in memory, then
/// written in a single call, so a crash never leaves a partial line.
pub struct JsonlSink {
    path: PathBuf,
    rotate_bytes: u64,
    rotate_keep: u32,
    fsync: bool,
    state: Mutex<Option<WriterState>>,
}

impl JsonlSink {
    /// Construct a sink writing to `path`, creating parent directories
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sink`] if the parent directory cannot be created.
    pub fn new(path: PathBuf, rotate_bytes: u64, rotate_keep: u32, fsync: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Sink(format!(
                    "failed to create sink directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        Ok(Self {
            path,
            rotate_bytes,
            rotate_keep,
            fsync,
            state: Mutex::new(None),
        })
    }

    /// Append one record, rotating first if the active file would exceed
    /// `rotate_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sink`] on serialization, rotation, or write
    /// failure. Callers must propagate this as backpressure rather than
    /// silently dropping the record.
    pub fn append(&self, record: &SinkRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|err| AppError::Sink(format!("failed to serialize record: {err}")))?;

        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Sink("sink writer mutex poisoned".into()))?;

        if guard.is_none() {
            *guard = Some(self.open_active()?);
        }

        let projected = guard.as_ref().map_or(0, |s| s.written_bytes) + line.len() as u64 + 1;
        if projected > self.rotate_bytes {
            drop(guard.take());
            self.rotate()?;
            *guard = Some(self.open_active()?);
        }

        if let Some(state) = guard.as_mut() {
            writeln!(state.writer, "{line}")
                .map_err(|err| AppError::Sink(format!("write failed: {err}")))?;
            state.writer.flush().map_err(|err| AppError::Sink(format!("flush failed: {err}")))?;
            if self.fsync {
                state
                    .writer
                    .get_ref()
                    .sync_all()
                    .map_err(|err| AppError::Sink(format!("fsync failed: {err}")))?;
            }
            state.written_bytes += line.len() as u64 + 1;
        }

        Ok(())
    }

    fn open_active(&self) -> Result<WriterState> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                AppError::Sink(format!("failed to open sink file {}: {err}", self.path.display()))
            })?;
        let written_bytes = file
            .metadata()
            .map_err(|err| AppError::Sink(format!("failed to stat sink file: {err}")))?
            .len();
        Ok(WriterState {
            writer: BufWriter::new(file),
            written_bytes,
        })
    }

    fn rotate(&self) -> Result<()> {
        self.write_tombstone()?;

        for n in (1..self.rotate_keep).rev() {
            let from = self.rotated_path(n);
            let to = self.rotated_path(n + 1);
            if from.exists() {
                fs::rename(&from, &to)
                    .map_err(|err| AppError::Sink(format!("rotation rename failed: {err}")))?;
            }
        }

        if self.rotate_keep > 0 {
            let target = self.rotated_path(1);
            fs::rename(&self.path, &target)
                .map_err(|err| AppError::Sink(format!("rotation rename failed: {err}")))?;
        } else {
            fs::remove_file(&self.path).ok();
        }

        Ok(())
    }

    fn write_tombstone(&self) -> Result<()> {
        let tombstone = SinkRecord::new(
            "_sink",
            "log",
            serde_json::json!({ "message": "rotation boundary", "max_bytes": self.rotate_bytes }),
        );
        let line = serde_json::to_string(&tombstone)
            .map_err(|err| AppError::Sink(format!("failed to serialize tombstone: {err}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| AppError::Sink(format!("failed to open sink for tombstone: {err}")))?;
        writeln!(file, "{line}").map_err(|err| AppError::Sink(format!("tombstone write failed: {err}")))
    }

    fn rotated_path(&self, n: u32) -> PathBuf {
        let stem = self.path.file_stem().and_then(|s| s.to_str()).unwrap_or("sink");
        let ext = self.path.extension().and_then(|s| s.to_str()).unwrap_or("jsonl");
        self.path
            .with_file_name(format!("{stem}.{n}.{ext}"))
    }
}

/// Read back all records currently in the active (non-rotated) file, in
/// file order. Used by tests and by tooling that inspects a live sink.
///
/// # Errors
///
/// Returns [`AppError::Sink`] if the file cannot be read, or if a line
/// fails to parse as a [`SinkRecord`].
pub fn read_active(path: &Path) -> Result<Vec<SinkRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)
        .map_err(|err| AppError::Sink(format!("failed to read sink file: {err}")))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|err| AppError::Sink(format!("failed to parse sink record: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_are_line_ordered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evidence.jsonl");
        let sink = JsonlSink::new(path.clone(), 1024 * 1024, 5, false).unwrap();

        sink.append(&SinkRecord::new("folderwatch", "summary", serde_json::json!({"n": 1})))
            .unwrap();
        sink.append(&SinkRecord::new("folderwatch", "summary", serde_json::json!({"n": 2})))
            .unwrap();

        let records = read_active(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data["n"], 1);
        assert_eq!(records[1].data["n"], 2);
    }

    #[test]
    fn rotates_when_size_threshold_exceeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diagnostics.jsonl");
        let sink = JsonlSink::new(path.clone(), 64, 2, false).unwrap();

        for i in 0..20 {
            sink.append(&SinkRecord::new(
                "folderwatch",
                "heartbeat",
                serde_json::json!({"i": i, "padding": "xxxxxxxxxxxxxxxxxxxx"}),
            ))
            .unwrap();
        }

        assert!(path.exists());
        assert!(sink.rotated_path(1).exists());
    }

    #[test]
    fn timestamps_are_monotonic_within_a_session_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evidence.jsonl");
        let sink = JsonlSink::new(path.clone(), 1024 * 1024, 5, false).unwrap();

        for i in 0..5 {
            sink.append(&SinkRecord::new("folderwatch", "summary", serde_json::json!({"i": i})))
                .unwrap();
        }

        let records = read_active(&path).unwrap();
        for pair in records.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
