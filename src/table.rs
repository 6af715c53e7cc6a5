//! Append-only CSV tables with resume support.
//!
//! Every durable store in the pipeline (identifier index, raw-record cache,
//! article output) is one of these: a header row plus append-only data rows.
//! Opening an existing table loads the key column into a seen-set so callers
//! can skip work that is already durable, and optionally tracks the maximum
//! of a timestamp column for resuming remote scans.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};

#[derive(Debug)]
pub struct AppendTable {
    path: PathBuf,
    writer: csv::Writer<File>,
    n_columns: usize,
    key_idx: usize,
    ts_idx: Option<usize>,
    keys: HashSet<String>,
    max_timestamp: Option<String>,
}

impl AppendTable {
    /// Open (or create) the table at `path`.
    ///
    /// An existing file must carry exactly `columns` as its header; anything
    /// else is a schema mismatch and fatal, so we never silently append
    /// incompatible rows. A row with the wrong field count is treated as
    /// truncation and is also fatal.
    pub fn open(
        path: &Path,
        columns: &[&str],
        key_column: &str,
        timestamp_column: Option<&str>,
    ) -> Result<Self> {
        let key_idx = column_index(path, columns, key_column)?;
        let ts_idx = timestamp_column
            .map(|c| column_index(path, columns, c))
            .transpose()?;

        let mut keys = HashSet::new();
        let mut max_timestamp: Option<String> = None;

        let exists = path.exists();
        if exists {
            let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
            let header = reader.headers()?.clone();
            if header.iter().ne(columns.iter().copied()) {
                return Err(HarvestError::storage(
                    path,
                    format!(
                        "header mismatch: found {:?}, expected {:?}",
                        header.iter().collect::<Vec<_>>(),
                        columns
                    ),
                ));
            }
            for record in reader.records() {
                let record = record?;
                if record.len() != columns.len() {
                    return Err(HarvestError::storage(
                        path,
                        format!(
                            "truncated row with {} of {} fields (key prefix {:?})",
                            record.len(),
                            columns.len(),
                            record.get(key_idx.min(record.len().saturating_sub(1)))
                        ),
                    ));
                }
                keys.insert(record[key_idx].to_string());
                if let Some(i) = ts_idx {
                    let ts = &record[i];
                    // RFC 3339 UTC timestamps order lexicographically.
                    if max_timestamp.as_deref().map_or(true, |max| ts > max) {
                        max_timestamp = Some(ts.to_string());
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if !exists {
            writer.write_record(columns)?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            n_columns: columns.len(),
            key_idx,
            ts_idx,
            keys,
            max_timestamp,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Maximum value seen in the designated timestamp column, if any.
    pub fn max_timestamp(&self) -> Option<&str> {
        self.max_timestamp.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to disk immediately, so an interrupted
    /// run loses at most the in-flight record.
    pub fn append(&mut self, row: &[String]) -> Result<()> {
        if row.len() != self.n_columns {
            return Err(HarvestError::storage(
                &self.path,
                format!("row has {} fields, table has {}", row.len(), self.n_columns),
            ));
        }
        self.writer.write_record(row)?;
        self.writer.flush()?;
        self.keys.insert(row[self.key_idx].clone());
        if let Some(i) = self.ts_idx {
            let ts = &row[i];
            if self.max_timestamp.as_deref().map_or(true, |max| ts.as_str() > max) {
                self.max_timestamp = Some(ts.clone());
            }
        }
        Ok(())
    }
}

fn column_index(path: &Path, columns: &[&str], column: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| *c == column)
        .ok_or_else(|| HarvestError::storage(path, format!("no column named {column:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write as _;
    use tempfile::tempdir;

    const COLS: &[&str] = &["id", "stamp", "value"];

    fn row(id: &str, stamp: &str, value: &str) -> Vec<String> {
        vec![id.to_string(), stamp.to_string(), value.to_string()]
    }

    #[test]
    fn create_append_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");

        {
            let mut t = AppendTable::open(&path, COLS, "id", Some("stamp")).unwrap();
            assert!(t.is_empty());
            t.append(&row("a", "2020-01-01T00:00:00Z", "first")).unwrap();
            t.append(&row("b", "2020-03-01T00:00:00Z", "second")).unwrap();
            assert!(t.contains("a"));
        }

        // second open picks up keys and the resume timestamp
        let t = AppendTable::open(&path, COLS, "id", Some("stamp")).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.contains("a") && t.contains("b"));
        assert_eq!(t.max_timestamp(), Some("2020-03-01T00:00:00Z"));
    }

    #[test]
    fn values_with_delimiters_and_newlines_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");
        {
            let mut t = AppendTable::open(&path, COLS, "id", None).unwrap();
            t.append(&row("x,y", "s", "line one\nline \"two\", quoted"))
                .unwrap();
        }
        let t = AppendTable::open(&path, COLS, "id", None).unwrap();
        assert!(t.contains("x,y"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn header_mismatch_is_fatal() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");
        fs::write(&path, "id,other\n1,2\n").unwrap();
        let err = AppendTable::open(&path, COLS, "id", None).unwrap_err();
        assert!(matches!(err, HarvestError::Storage { .. }), "{err}");
    }

    #[test]
    fn truncated_row_is_detected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");
        {
            let mut t = AppendTable::open(&path, COLS, "id", None).unwrap();
            t.append(&row("a", "s", "v")).unwrap();
        }
        // simulate a crash mid-row: a final line missing fields
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"b,partial").unwrap();
        drop(f);

        let err = AppendTable::open(&path, COLS, "id", None).unwrap_err();
        assert!(matches!(err, HarvestError::Storage { .. }), "{err}");
    }

    #[test]
    fn wrong_width_row_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");
        let mut t = AppendTable::open(&path, COLS, "id", None).unwrap();
        let err = t.append(&["only".to_string()]).unwrap_err();
        assert!(matches!(err, HarvestError::Storage { .. }));
    }

    #[test]
    fn missing_key_column_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");
        assert!(AppendTable::open(&path, COLS, "nope", None).is_err());
    }
}
