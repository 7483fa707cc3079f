//! Append-only CSV store for acquisition records.
//!
//! Each [`CsvSink::append`] is self-contained: open in append mode, write the
//! header if the file is new or empty, write one row, flush and sync, close.
//! Nothing is held open between ticks, so a crash between two appends leaves
//! every earlier row intact. A crash during an append can leave a torn final
//! line; the next append truncates the store back to its last complete line
//! (rewriting the header if that was the torn line) before writing.
//!
//! The store is single-writer. Two sinks appending to one path concurrently
//! would need external locking.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Column names, in order.
pub const HEADER: [&str; 2] = ["pressure", "time"];

/// Timestamp layout of the `time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRecord {
    /// Raw pressure field as the controller reported it.
    pub pressure: String,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub time: String,
}

/// Header-once, append-only CSV file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    /// Sink writing to `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// # Errors
    /// Returns [`StorageError`] if the store cannot be opened, written or
    /// synced. The row is either fully written or the error is returned.
    pub fn append(&self, record: &AcquisitionRecord) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let len = file.metadata().map_err(|e| self.io_error(e))?.len();
        let len = match torn_tail_start(&mut file, len).map_err(|e| self.io_error(e))? {
            Some(keep) => {
                warn!(
                    path = %self.path.display(),
                    discarded = len - keep,
                    "store ends with a torn row, truncating it before appending"
                );
                // Append-mode handles cannot truncate on Windows
                OpenOptions::new()
                    .write(true)
                    .open(&self.path)
                    .and_then(|f| f.set_len(keep))
                    .map_err(|e| self.io_error(e))?;
                keep
            }
            None => len,
        };
        let write_header = len == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(record).map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))?;

        let file = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;
        file.sync_data().map_err(|e| self.io_error(e))?;

        debug!(
            path = %self.path.display(),
            header = write_header,
            pressure = %record.pressure,
            time = %record.time,
            "record appended"
        );
        Ok(())
    }

    /// Read every row back, in store order.
    ///
    /// # Errors
    /// Returns [`StorageError`] if the store is missing or a row is malformed.
    pub fn read_all(&self) -> Result<Vec<AcquisitionRecord>, StorageError> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.csv_error(e))?;
        reader
            .deserialize()
            .collect::<Result<Vec<AcquisitionRecord>, _>>()
            .map_err(|e| self.csv_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> StorageError {
        StorageError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// Length to truncate a `len`-byte store to so it ends on a complete line,
/// or `None` if it already does.
fn torn_tail_start(file: &mut File, len: u64) -> std::io::Result<Option<u64>> {
    const CHUNK: u64 = 4096;

    let mut buf = [0u8; CHUNK as usize];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if end == len && chunk.last() == Some(&b'\n') {
            return Ok(None);
        }
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(Some(start + pos as u64 + 1));
        }
        end = start;
    }
    Ok(if len == 0 { None } else { Some(0) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(pressure: &str, time: &str) -> AcquisitionRecord {
        AcquisitionRecord {
            pressure: pressure.to_string(),
            time: time.to_string(),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("spce_pressure.csv"));

        for i in 0..3 {
            sink.append(&record(&format!("1.{}E-04", i), "2025-01-01 00:00:00"))
                .unwrap();
        }

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "pressure,time",
                "1.0E-04,2025-01-01 00:00:00",
                "1.1E-04,2025-01-01 00:00:00",
                "1.2E-04,2025-01-01 00:00:00",
            ]
        );
    }

    #[test]
    fn test_existing_store_keeps_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("existing.csv");
        std::fs::write(&path, "pressure,time\n9.9E-09,2024-12-31 23:59:59\n").unwrap();

        let sink = CsvSink::new(&path);
        sink.append(&record("1.0E-08", "2025-01-01 00:00:00"))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("pressure,time").count(), 1);
        assert!(contents.ends_with("1.0E-08,2025-01-01 00:00:00\n"));
    }

    #[test]
    fn test_empty_file_gets_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        File::create(&path).unwrap();

        let sink = CsvSink::new(&path);
        sink.append(&record("1.0E-08", "2025-01-01 00:00:00"))
            .unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .starts_with("pressure,time\n"));
    }

    #[test]
    fn test_torn_row_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.csv");
        std::fs::write(
            &path,
            "pressure,time\n1.0E-09,2025-01-01 00:00:00\n2.0E-09,2025-01-01 00:0",
        )
        .unwrap();

        let sink = CsvSink::new(&path);
        sink.append(&record("3.0E-09", "2025-01-01 00:00:02"))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "pressure,time\n1.0E-09,2025-01-01 00:00:00\n3.0E-09,2025-01-01 00:00:02\n"
        );
        assert_eq!(
            sink.read_all().unwrap(),
            vec![
                record("1.0E-09", "2025-01-01 00:00:00"),
                record("3.0E-09", "2025-01-01 00:00:02"),
            ]
        );
    }

    #[test]
    fn test_torn_header_is_rewritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn_header.csv");
        std::fs::write(&path, "press").unwrap();

        let sink = CsvSink::new(&path);
        sink.append(&record("3.0E-09", "2025-01-01 00:00:00"))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "pressure,time\n3.0E-09,2025-01-01 00:00:00\n"
        );
    }

    #[test]
    fn test_torn_row_longer_than_one_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long_tail.csv");
        let mut contents = b"pressure,time\n1.0E-09,2025-01-01 00:00:00\n".to_vec();
        contents.extend(std::iter::repeat(b'9').take(10_000));
        std::fs::write(&path, contents).unwrap();

        let sink = CsvSink::new(&path);
        sink.append(&record("2.0E-09", "2025-01-01 00:00:01"))
            .unwrap();

        assert_eq!(sink.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_raw_field_with_space_round_trips() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("raw.csv"));
        sink.append(&record("3.8E-09 ", "2025-01-01 00:00:00"))
            .unwrap();

        let rows = sink.read_all().unwrap();
        assert_eq!(rows, vec![record("3.8E-09 ", "2025-01-01 00:00:00")]);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("nested/run/spce.csv"));
        sink.append(&record("1.0E-08", "2025-01-01 00:00:00"))
            .unwrap();
        assert_eq!(sink.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_unwritable_store_is_error() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened as the store
        let sink = CsvSink::new(dir.path());
        let err = sink
            .append(&record("1.0E-08", "2025-01-01 00:00:00"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
