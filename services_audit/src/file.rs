//! JSON-lines file sink
//!
//! One serialized [`DistributionRecord`] per line, appended and flushed
//! before `append` returns. A failed write is cut back to the last complete
//! line; if that is impossible the sink refuses further appends.

use crate::{check_order, AuditError, AuditSink, DistributionRecord};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: File,
    last_sequence: Option<u64>,
    poisoned: bool,
}

impl JsonLinesAuditSink {
    /// Opens `path` for appending, creating it if needed
    ///
    /// Existing entries are read so new records continue their sequence.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                AuditError::StorageUnavailable(format!("{}: {err}", path.display()))
            })?;
        let last_sequence = read_records(&path)?.last().map(|r| r.sequence);
        log::debug!("audit trail at {}", path.display());
        Ok(Self {
            path,
            file,
            last_sequence,
            poisoned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> AuditError {
        AuditError::StorageUnavailable(format!("{}: {err}", self.path.display()))
    }

    /// Drops anything written past `len`
    fn rollback(&mut self, len: u64) {
        if let Err(err) = self.file.set_len(len) {
            log::error!(
                "{}: cannot drop partial record ({err}); refusing further appends",
                self.path.display()
            );
            self.poisoned = true;
        }
    }
}

fn read_records(path: &Path) -> Result<Vec<DistributionRecord>, AuditError> {
    let data = fs::read_to_string(path)?;
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| AuditError::Corrupt {
                line: index + 1,
                reason: err.to_string(),
            })
        })
        .collect()
}

impl AuditSink for JsonLinesAuditSink {
    fn append(&mut self, record: DistributionRecord) -> Result<(), AuditError> {
        if self.poisoned {
            return Err(self.unavailable("trail holds a partial record"));
        }
        check_order(self.last_sequence, &record)?;
        let mut line =
            serde_json::to_vec(&record).map_err(|err| AuditError::Encode(err.to_string()))?;
        line.push(b'\n');

        let start = self.file.metadata().map_err(|err| self.unavailable(err))?.len();
        if let Err(err) = self.file.write_all(&line).and_then(|_| self.file.flush()) {
            self.rollback(start);
            return Err(self.unavailable(err));
        }
        self.last_sequence = Some(record.sequence);
        Ok(())
    }

    fn records(&self) -> Result<Vec<DistributionRecord>, AuditError> {
        read_records(&self.path)
    }
}
