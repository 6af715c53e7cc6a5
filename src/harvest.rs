//! Final stage: walk cached raw records, pull per-article OCR text and
//! append finished rows to the output table.
//!
//! This is the only stage whose network traffic scales with the article
//! count, so the url dedup check runs before the OCR fetch: an article that
//! is already durable costs no request on a resumed run.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::cache::CachedRecord;
use crate::config::HarvestConfig;
use crate::error::Result;
use crate::extract::{self, ArticleBody, ArticleMeta, SourceMeta, ARTICLE_ID_RE};
use crate::fetch::OcrSource;
use crate::table::AppendTable;
use crate::xml;

pub const ARTICLE_COLUMNS: &[&str] = &[
    "publisher",
    "publisher_alt",
    "date",
    "volume_int",
    "issuenumber_int",
    "issue_url",
    "page_int",
    "url",
    "title",
    "text",
];

/// One finished article: issue metadata, article metadata and OCR body,
/// merged field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub publisher: String,
    pub publisher_alt: String,
    pub date: Option<NaiveDate>,
    pub volume: Option<i64>,
    pub issue_number: Option<i64>,
    pub issue_url: String,
    pub page: Option<i64>,
    pub url: String,
    pub title: String,
    /// Title as the OCR layer saw it; kept for comparison against the
    /// metadata title, not written to the output table.
    pub ocr_title: String,
    pub text: String,
}

impl Article {
    pub fn from_parts(source: &SourceMeta, meta: ArticleMeta, body: ArticleBody) -> Self {
        Article {
            publisher: source.publisher.clone(),
            publisher_alt: source.publisher_alt.clone(),
            date: source.date,
            volume: source.volume,
            issue_number: source.issue_number,
            issue_url: source.issue_url.clone(),
            page: meta.page,
            url: meta.url,
            title: meta.title,
            ocr_title: body.ocr_title,
            text: body.text,
        }
    }

    /// Row in `ARTICLE_COLUMNS` order. Absent numerics render empty, not zero.
    fn to_row(&self) -> Vec<String> {
        vec![
            self.publisher.clone(),
            self.publisher_alt.clone(),
            self.date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            self.volume.map(|v| v.to_string()).unwrap_or_default(),
            self.issue_number.map(|v| v.to_string()).unwrap_or_default(),
            self.issue_url.clone(),
            self.page.map(|v| v.to_string()).unwrap_or_default(),
            self.url.clone(),
            self.title.clone(),
            self.text.clone(),
        ]
    }
}

pub fn output_path(config: &HarvestConfig) -> PathBuf {
    config.out_dir.join(format!(
        "KB_{}_{}_{}.csv",
        config.set,
        config.from_date.format("%Y-%m-%d"),
        config.to_date.format("%Y-%m-%d"),
    ))
}

/// Extract and append every article from `records` that is not yet in the
/// output table. Returns the number of appended rows.
pub async fn harvest_articles(
    config: &HarvestConfig,
    ocr: &impl OcrSource,
    records: impl IntoIterator<Item = Result<CachedRecord>>,
    output: &Path,
) -> Result<u64> {
    let mut table = AppendTable::open(output, ARTICLE_COLUMNS, "url", None)?;
    info!(path = %output.display(), known = table.len(), "harvesting articles");

    let mut appended: u64 = 0;
    for record in records {
        let record = record?;
        let root = match xml::parse(&record.document, "cached record") {
            Ok(root) => root,
            Err(e) => {
                warn!(identifier = %record.identifier, error = %e, "cached record unparseable; skipping");
                continue;
            }
        };
        let top = match extract::issue_item(&root) {
            Ok(top) => top,
            Err(e) => {
                warn!(identifier = %record.identifier, error = %e, "skipping record");
                continue;
            }
        };
        let Some(first) = top.children.first() else {
            warn!(identifier = %record.identifier, "issue item has no children; skipping");
            continue;
        };
        let source_meta = match extract::parse_source_meta(first, &config.language) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                debug!(identifier = %record.identifier, "wrong language; skipping");
                continue;
            }
            Err(e) => {
                warn!(identifier = %record.identifier, error = %e, "source meta unparseable; skipping");
                continue;
            }
        };

        for component in top.children.iter().skip(1) {
            let Some(component_id) = component.attr("identifier") else {
                continue;
            };
            if !ARTICLE_ID_RE.is_match(component_id) {
                continue;
            }
            let meta = match extract::parse_article_meta(component) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(component = %component_id, error = %e, "article meta unparseable; skipping");
                    continue;
                }
            };
            if meta.url.is_empty() {
                warn!(component = %component_id, "article without url; skipping");
                continue;
            }
            if table.contains(&meta.url) {
                continue;
            }

            let ocr_xml = match ocr.ocr_document(component_id).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(component = %component_id, error = %e, "ocr fetch failed; skipping");
                    continue;
                }
            };
            let body = match xml::parse(&ocr_xml, "ocr document") {
                Ok(doc) => extract::parse_ocr_body(&doc),
                Err(e) => {
                    warn!(component = %component_id, error = %e, "ocr document unparseable; skipping");
                    continue;
                }
            };

            let article = Article::from_parts(&source_meta, meta, body);
            if article.ocr_title != article.title {
                debug!(url = %article.url, meta = %article.title, ocr = %article.ocr_title,
                    "ocr title differs from metadata title");
            }
            table.append(&article.to_row())?;
            appended += 1;
        }
    }

    info!(appended, total = table.len(), "harvest done");
    Ok(appended)
}
