//! Append-only JSON Lines audit log with crash-safe replay.
//!
//! One JSON object per line. Complete lines are always valid JSON; a partial
//! final line left by a crash mid-write is detected and truncated when the
//! log is read back.
//!
//! Every append is followed by `sync_all()`: audit records are the only
//! trace of a failed unit once its transaction has rolled back.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AuditError, AuditEvent, AuditSink};

/// A persisted audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic sequence number.
    pub seq: u64,

    /// When the record was written (UTC).
    pub ts: DateTime<Utc>,

    /// The event, flattened into the JSON object.
    #[serde(flatten)]
    pub event: AuditEvent,
}

struct LogInner {
    file: File,
    next_seq: u64,
}

/// An append-only audit log file.
pub struct JsonlAuditLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl JsonlAuditLog {
    /// Opens or creates the log at `path`.
    ///
    /// Existing records are replayed first to find the next sequence number;
    /// a torn final line is truncated in the process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let (existing, next_seq) = Self::read_all(&path)?;
        debug!(path = %path.display(), records = existing.len(), "Opened audit log");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlAuditLog {
            path,
            inner: Mutex::new(LogInner { file, next_seq }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `event` and syncs it to disk. Returns the written record.
    pub fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| AuditError::Unavailable("audit log lock poisoned".to_string()))?;

        let record = AuditRecord {
            seq: inner.next_seq,
            ts: Utc::now(),
            event,
        };
        let json = serde_json::to_string(&record)?;
        writeln!(inner.file, "{}", json)?;
        inner.file.sync_all()?;

        inner.next_seq += 1;
        Ok(record)
    }

    /// Reads every record in the log, truncating a partial final line.
    ///
    /// Returns `(records, next_seq)`. A missing file reads as empty. Reading
    /// stops at the first line that does not parse or whose sequence number
    /// does not increase; the file is truncated there.
    pub fn read_all(path: impl AsRef<Path>) -> Result<(Vec<AuditRecord>, u64), AuditError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((vec![], 0));
        }

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut records: Vec<AuditRecord> = Vec::new();
        let mut last_valid_pos = 0u64;
        let mut current_pos = 0u64;

        // Bytes, not lines of text: a torn write may end inside a UTF-8
        // sequence.
        let mut line = Vec::new();
        loop {
            line.clear();
            let bytes_read = reader.read_until(b'\n', &mut line)?;
            if bytes_read == 0 {
                break;
            }
            current_pos += bytes_read as u64;

            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                last_valid_pos = current_pos;
                continue;
            }

            match serde_json::from_slice::<AuditRecord>(trimmed) {
                Ok(record) if records.last().is_none_or(|prev| record.seq > prev.seq) => {
                    records.push(record);
                    last_valid_pos = current_pos;
                }
                _ => break,
            }
        }

        if last_valid_pos < file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(last_valid_pos)?;
            file.sync_all()?;
        }

        let next_seq = records.last().map(|r| r.seq + 1).unwrap_or(0);
        Ok((records, next_seq))
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.append(event).map(|_| ())
    }
}

impl std::fmt::Debug for JsonlAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlAuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
