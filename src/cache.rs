//! Local cache of raw record documents, one table per query scope.
//!
//! Entries outside the caller's publisher set or date window are still
//! recorded (selected=false, empty document) so resumed runs do not keep
//! re-checking the same non-matching identifiers.

use std::collections::HashSet;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::HarvestConfig;
use crate::error::Result;
use crate::fetch::RecordSource;
use crate::index::IndexEntry;
use crate::table::AppendTable;

pub const CACHE_COLUMNS: &[&str] = &["id", "date", "publisher", "selected", "record_document"];

/// The parameters a cache file is scoped to. Distinct scopes get distinct
/// fingerprints, so their cache files never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryScope {
    pub set: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    /// Sorted, so the fingerprint does not depend on selection order.
    pub publishers: Vec<String>,
}

impl QueryScope {
    pub fn new(config: &HarvestConfig, publishers: &[String]) -> Self {
        let mut publishers = publishers.to_vec();
        publishers.sort();
        QueryScope {
            set: config.set.clone(),
            from_date: config.from_date,
            to_date: config.to_date,
            publishers,
        }
    }

    /// Stable short identifier for this scope, used in the cache file name.
    pub fn fingerprint(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

pub fn cache_path(config: &HarvestConfig, scope: &QueryScope) -> PathBuf {
    config.out_dir.join(format!(
        "KB_{}_{}_RAW_RECORDS.csv",
        config.set,
        scope.fingerprint()
    ))
}

/// Both window boundaries are inclusive.
pub fn in_window(date: NaiveDate, from: NaiveDate, to: NaiveDate) -> bool {
    date >= from && date <= to
}

/// Download raw records for every index entry inside the scope that is not
/// cached yet. Returns the cache file path for [`selected_records`].
///
/// A fetch failure leaves the entry unrecorded so the next run retries it.
pub async fn ensure_cached(
    config: &HarvestConfig,
    source: &impl RecordSource,
    index: &[IndexEntry],
    publishers: &[String],
) -> Result<PathBuf> {
    let scope = QueryScope::new(config, publishers);
    let path = cache_path(config, &scope);
    let mut table = AppendTable::open(&path, CACHE_COLUMNS, "id", None)?;
    let wanted: HashSet<&str> = scope.publishers.iter().map(String::as_str).collect();
    info!(path = %path.display(), cached = table.len(), "filling record cache");

    let mut fetched: u64 = 0;
    for entry in index {
        if table.contains(&entry.identifier) {
            continue;
        }
        let selected = wanted.contains(entry.publisher.as_str())
            && in_window(entry.date, config.from_date, config.to_date);

        let document = if selected {
            match source.record(&entry.identifier).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(identifier = %entry.identifier, error = %e, "record fetch failed; will retry next run");
                    continue;
                }
            }
        } else {
            String::new()
        };

        table.append(&[
            entry.identifier.clone(),
            entry.date.format("%Y-%m-%d").to_string(),
            entry.publisher.clone(),
            selected.to_string(),
            document,
        ])?;
        if selected {
            fetched += 1;
        }
    }

    info!(fetched, total = table.len(), "record cache up to date");
    Ok(path)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub identifier: String,
    pub document: String,
}

/// Only the fields the stream needs; the other columns are skipped.
#[derive(Debug, Deserialize)]
struct CacheRow {
    id: String,
    selected: bool,
    record_document: String,
}

/// Lazily yields the selected records from a cache file, in file order.
pub struct SelectedRecords {
    rows: csv::DeserializeRecordsIntoIter<File, CacheRow>,
}

impl Iterator for SelectedRecords {
    type Item = Result<CachedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.rows.next()? {
                Ok(row) if row.selected => {
                    return Some(Ok(CachedRecord {
                        identifier: row.id,
                        document: row.record_document,
                    }));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

pub fn selected_records(path: &Path) -> Result<SelectedRecords> {
    let reader = csv::Reader::from_path(path)?;
    Ok(SelectedRecords {
        rows: reader.into_deserialize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_LANGUAGE, DEFAULT_SET};
    use crate::fetch::IdentifierPage;
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn config(out_dir: &Path, from: (i32, u32, u32), to: (i32, u32, u32)) -> HarvestConfig {
        HarvestConfig {
            oai_base: "http://example.invalid/oai/".to_string(),
            resolver_base: "http://example.invalid/resolve".to_string(),
            api_key: None,
            set: DEFAULT_SET.to_string(),
            from_date: NaiveDate::from_ymd_opt(from.0, from.1, from.2).unwrap(),
            to_date: NaiveDate::from_ymd_opt(to.0, to.1, to.2).unwrap(),
            out_dir: out_dir.to_path_buf(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    fn entry(identifier: &str, publisher: &str, date: (i32, u32, u32)) -> IndexEntry {
        IndexEntry {
            identifier: identifier.to_string(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            publisher: publisher.to_string(),
            publisher_alt: String::new(),
            harvest_timestamp: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    struct StubSource {
        records: HashMap<String, String>,
        calls: RefCell<usize>,
    }

    impl StubSource {
        fn new(records: Vec<(&str, &str)>) -> Self {
            StubSource {
                records: records
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: RefCell::new(0),
            }
        }
    }

    impl RecordSource for StubSource {
        async fn identifier_page(
            &self,
            _set: &str,
            _from: &str,
            _token: Option<&str>,
        ) -> Result<IdentifierPage> {
            unreachable!("cache never lists identifiers")
        }

        async fn record(&self, identifier: &str) -> Result<String> {
            *self.calls.borrow_mut() += 1;
            self.records.get(identifier).cloned().ok_or_else(|| {
                crate::error::HarvestError::TransientFetch {
                    url: identifier.to_string(),
                    attempts: 3,
                    reason: "stubbed failure".to_string(),
                }
            })
        }
    }

    #[test]
    fn fingerprint_is_order_insensitive_and_scope_sensitive() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path(), (1930, 1, 1), (1931, 1, 1));
        let a = QueryScope::new(&cfg, &["B".to_string(), "A".to_string()]);
        let b = QueryScope::new(&cfg, &["A".to_string(), "B".to_string()]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = QueryScope::new(&cfg, &["A".to_string()]);
        assert_ne!(a.fingerprint(), c.fingerprint());

        let other_window = config(tmp.path(), (1930, 1, 1), (1932, 1, 1));
        let d = QueryScope::new(&other_window, &["A".to_string(), "B".to_string()]);
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let from = NaiveDate::from_ymd_opt(1930, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(1930, 12, 31).unwrap();
        assert!(in_window(from, from, to));
        assert!(in_window(to, from, to));
        assert!(!in_window(from.pred_opt().unwrap(), from, to));
        assert!(!in_window(to.succ_opt().unwrap(), from, to));
    }

    #[tokio::test]
    async fn caches_selected_records_and_marks_the_rest() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path(), (1930, 1, 1), (1930, 12, 31));
        let index = vec![
            entry("in-window", "NRC", (1930, 5, 1)),
            entry("boundary", "NRC", (1930, 12, 31)),
            entry("other-publisher", "De Tijd", (1930, 5, 1)),
            entry("too-late", "NRC", (1931, 1, 1)),
        ];
        let source = StubSource::new(vec![
            ("in-window", "<record>one</record>"),
            ("boundary", "<record>two</record>"),
        ]);

        let publishers = vec!["NRC".to_string()];
        let path = ensure_cached(&cfg, &source, &index, &publishers)
            .await
            .unwrap();
        assert_eq!(*source.calls.borrow(), 2);

        let selected: Vec<_> = selected_records(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].identifier, "in-window");
        assert_eq!(selected[0].document, "<record>one</record>");

        // second run is a no-op: everything is already marked
        let source2 = StubSource::new(vec![]);
        ensure_cached(&cfg, &source2, &index, &publishers)
            .await
            .unwrap();
        assert_eq!(*source2.calls.borrow(), 0);
        assert_eq!(selected_records(&path).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_on_the_next_run() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path(), (1930, 1, 1), (1930, 12, 31));
        let index = vec![entry("flaky", "NRC", (1930, 5, 1))];
        let publishers = vec!["NRC".to_string()];

        // first run: fetch fails, nothing recorded
        let broken = StubSource::new(vec![]);
        let path = ensure_cached(&cfg, &broken, &index, &publishers)
            .await
            .unwrap();
        assert_eq!(selected_records(&path).unwrap().count(), 0);

        // second run: fetch succeeds and the record lands in the cache
        let fixed = StubSource::new(vec![("flaky", "<record>ok</record>")]);
        ensure_cached(&cfg, &fixed, &index, &publishers)
            .await
            .unwrap();
        assert_eq!(*fixed.calls.borrow(), 1);
        assert_eq!(selected_records(&path).unwrap().count(), 1);
    }
}
