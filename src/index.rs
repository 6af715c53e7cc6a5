//! Durable identifier index: one row per issue ever seen in the remote
//! catalog, keyed by identifier, with the remote harvest timestamp used to
//! resume interrupted scans.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::Result;
use crate::extract;
use crate::fetch::RecordSource;
use crate::table::AppendTable;

pub const INDEX_COLUMNS: &[&str] = &[
    "identifier",
    "date",
    "publisher",
    "publisher_alt",
    "harvest_timestamp",
];

/// Resume point for an empty index. Matches the earliest material the
/// harvesting endpoint serves without an explicit start date.
pub const INDEX_EPOCH: &str = "2000-01-01T00:00:00Z";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexEntry {
    pub identifier: String,
    pub date: NaiveDate,
    pub publisher: String,
    pub publisher_alt: String,
    pub harvest_timestamp: DateTime<Utc>,
}

pub fn index_path(config: &HarvestConfig) -> PathBuf {
    config.out_dir.join(format!("KB_{}_INDEX.csv", config.set))
}

/// Incrementally scan the remote catalog and append every identifier not yet
/// in the index. Returns the number of entries added.
///
/// The scan starts at the maximum harvest timestamp already recorded; the
/// remote catalog may overlap backward from that point, so already-indexed
/// identifiers are expected and skipped silently. A fetch or parse failure
/// for a single identifier is logged and skipped: the scan resumes from the
/// last durable timestamp on the next run either way.
pub async fn update_index(config: &HarvestConfig, source: &impl RecordSource) -> Result<u64> {
    let path = index_path(config);
    let mut table = AppendTable::open(&path, INDEX_COLUMNS, "identifier", Some("harvest_timestamp"))?;
    let since = table.max_timestamp().unwrap_or(INDEX_EPOCH).to_string();
    info!(path = %path.display(), known = table.len(), %since, "updating identifier index");

    let mut added: u64 = 0;
    let mut pages: u64 = 0;
    let mut token: Option<String> = None;
    loop {
        let page = source
            .identifier_page(&config.set, &since, token.as_deref())
            .await?;
        pages += 1;

        for header in &page.headers {
            if table.contains(&header.identifier) {
                continue;
            }
            let raw = match source.record(&header.identifier).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(identifier = %header.identifier, error = %e, "record fetch failed; skipping");
                    continue;
                }
            };
            let meta = match extract::record_source_meta(&raw, &config.language) {
                Ok(Some(meta)) => meta,
                Ok(None) => {
                    debug!(identifier = %header.identifier, "wrong language; skipping");
                    continue;
                }
                Err(e) => {
                    warn!(identifier = %header.identifier, error = %e, "record parse failed; skipping");
                    continue;
                }
            };
            let Some(date) = meta.date else {
                warn!(identifier = %header.identifier, "record has no parseable date; skipping");
                continue;
            };
            table.append(&[
                header.identifier.clone(),
                date.format("%Y-%m-%d").to_string(),
                meta.publisher,
                meta.publisher_alt,
                header
                    .datestamp
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ])?;
            added += 1;
        }

        if added > 0 && added % 100 == 0 {
            info!(added, pages, "index scan progress");
        }
        token = page.resumption_token;
        if token.is_none() {
            break;
        }
    }

    info!(added, pages, total = table.len(), "index update done");
    Ok(added)
}

/// Load the whole index for filtering and selection.
pub fn load_index(path: &Path) -> Result<Vec<IndexEntry>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for row in reader.deserialize::<IndexEntry>() {
        entries.push(row?);
    }
    Ok(entries)
}
