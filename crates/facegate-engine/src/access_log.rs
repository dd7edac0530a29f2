//! Append-only record of successful recognitions.
//!
//! CSV without a header, one record per line:
//! `identity_id,display_name,YYYY-MM-DD HH:MM:SS`.

use chrono::{NaiveDateTime, Timelike};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FIELDS_PER_RECORD: usize = 3;

#[derive(Error, Debug)]
pub enum AccessLogError {
    #[error("failed to write access log {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to read access log {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One successful recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogEntry {
    pub identity_id: u32,
    pub display_name: String,
    pub timestamp: NaiveDateTime,
}

impl AccessLogEntry {
    /// Entry stamped with the current local time (second precision).
    pub fn now(identity_id: u32, display_name: impl Into<String>) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            identity_id,
            display_name: display_name.into(),
            timestamp: now.with_nanosecond(0).unwrap_or(now),
        }
    }
}

/// Access log backed by a single CSV file.
#[derive(Debug, Clone)]
pub struct AccessLog {
    path: PathBuf,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it to disk. Any failure is returned; a
    /// recognition that cannot be recorded must not pass as a success.
    pub fn append(&self, entry: &AccessLogEntry) -> Result<(), AccessLogError> {
        self.write_record(entry).map_err(|source| AccessLogError::Write {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(
            identity_id = entry.identity_id,
            display_name = %entry.display_name,
            timestamp = %entry.timestamp,
            "access logged"
        );
        Ok(())
    }

    fn write_record(&self, entry: &AccessLogEntry) -> Result<(), csv::Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([
            entry.identity_id.to_string(),
            entry.display_name.clone(),
            entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        ])?;
        writer.flush()?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        Ok(())
    }

    /// Every entry in write order. A missing file is an empty log; malformed
    /// rows are skipped.
    pub fn read_all(&self) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let read_err = |source| AccessLogError::Read {
            path: self.path.clone(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(read_err)?;

        let mut entries = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(read_err)?;
            match parse_record(&record) {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(
                    path = %self.path.display(),
                    line = line + 1,
                    "skipping malformed access log record"
                ),
            }
        }
        Ok(entries)
    }
}

fn parse_record(record: &csv::StringRecord) -> Option<AccessLogEntry> {
    if record.len() != FIELDS_PER_RECORD {
        return None;
    }
    let identity_id = record.get(0)?.trim().parse().ok()?;
    let display_name = record.get(1)?.to_string();
    let timestamp = NaiveDateTime::parse_from_str(record.get(2)?.trim(), TIMESTAMP_FORMAT).ok()?;
    Some(AccessLogEntry {
        identity_id,
        display_name,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn entry(id: u32, name: &str, time: NaiveDateTime) -> AccessLogEntry {
        AccessLogEntry {
            identity_id: id,
            display_name: name.into(),
            timestamp: time,
        }
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = AccessLog::new(dir.path().join("access_log.csv"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_preserves_write_order() {
        let dir = TempDir::new().unwrap();
        let log = AccessLog::new(dir.path().join("logs").join("access_log.csv"));
        let written = vec![
            entry(2, "bob", at(9, 0, 0)),
            entry(1, "ali", at(8, 0, 0)),
            entry(2, "bob", at(10, 30, 5)),
        ];
        for e in &written {
            log.append(e).unwrap();
        }

        assert_eq!(log.read_all().unwrap(), written);
    }

    #[test]
    fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let log = AccessLog::new(dir.path().join("access_log.csv"));
        log.append(&entry(1, "Ali", at(7, 5, 9))).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "1,Ali,2026-10-16 07:05:09\n");
    }

    #[test]
    fn test_name_with_delimiter_roundtrips() {
        let dir = TempDir::new().unwrap();
        let log = AccessLog::new(dir.path().join("access_log.csv"));
        let e = entry(3, "Smith, \"Jo\"", at(12, 0, 0));
        log.append(&e).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![e]);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access_log.csv");
        fs::write(
            &path,
            "1,ali,2026-10-16 08:00:00\nbroken\nx,bob,2026-10-16 08:00:00\n2,bob,yesterday\n3,cy,2026-10-16 09:00:00\n",
        )
        .unwrap();

        let ids: Vec<u32> = AccessLog::new(path)
            .read_all()
            .unwrap()
            .iter()
            .map(|e| e.identity_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_append_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        // A directory where the log file should be makes every append fail.
        let path = dir.path().join("access_log.csv");
        fs::create_dir(&path).unwrap();

        let err = AccessLog::new(path).append(&entry(1, "ali", at(1, 2, 3))).unwrap_err();
        assert!(matches!(err, AccessLogError::Write { .. }));
    }

    #[test]
    fn test_now_has_second_precision() {
        let e = AccessLogEntry::now(1, "ali");
        assert_eq!(e.timestamp.nanosecond(), 0);
    }
}
