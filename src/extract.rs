//! Pure mappings from harvested DIDL records to typed metadata.
//!
//! Nothing here does I/O. The OCR and record documents are fetched by
//! `fetch` and parsed into [`crate::xml::XmlNode`] trees first.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{HarvestError, Result};
use crate::xml::XmlNode;

/// Article component identifiers end in a literal `a` plus an index,
/// e.g. `ddd:010423906:mpeg21:a0004`.
pub static ARTICLE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"a[0-9]+$").expect("article id pattern is valid"));

/// Per-issue attributes shared by every article in the issue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMeta {
    pub publisher: String,
    pub publisher_alt: String,
    pub date: Option<NaiveDate>,
    pub volume: Option<i64>,
    pub issue_number: Option<i64>,
    pub issue_url: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleMeta {
    pub title: String,
    pub url: String,
    pub page: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleBody {
    pub ocr_title: String,
    pub text: String,
}

/// The issue's top `Item` under the DIDL root. Its first child carries the
/// source metadata; later children are the issue's components.
pub fn issue_item(root: &XmlNode) -> Result<&XmlNode> {
    root.find("DIDL")
        .and_then(|didl| didl.find("Item"))
        .ok_or_else(|| HarvestError::parse("record", "no DIDL/Item element"))
}

/// Extract issue-level metadata from the labeled fields of the `dcx` block.
///
/// Returns `Ok(None)` when a language field is present and is not the
/// expected language: the whole record is to be discarded, which is not an
/// error. A missing `dcx` block is one.
pub fn parse_source_meta(item: &XmlNode, language: &str) -> Result<Option<SourceMeta>> {
    let dcx = item
        .find("dcx")
        .ok_or_else(|| HarvestError::parse("source meta", "no dcx metadata block"))?;

    let mut meta = SourceMeta::default();
    for field in &dcx.children {
        match field.name.as_str() {
            "title" => meta.publisher = field.trimmed_text().to_string(),
            "isVersionOf" => meta.publisher_alt = field.trimmed_text().to_string(),
            // Two fields are named `identifier`; the issue URL is the one
            // carrying no attributes (the other has an xsi:type).
            "identifier" if field.attrs.is_empty() => {
                meta.issue_url = field.trimmed_text().to_string();
            }
            "volume" => meta.volume = leading_int(field.trimmed_text()),
            "issuenumber" => meta.issue_number = leading_int(field.trimmed_text()),
            "date" => {
                meta.date = NaiveDate::parse_from_str(field.trimmed_text(), "%Y-%m-%d").ok();
            }
            "language" => {
                if field.trimmed_text() != language {
                    return Ok(None);
                }
            }
            _ => {}
        }
    }
    Ok(Some(meta))
}

/// Extract title, URL and page number for one article component.
pub fn parse_article_meta(item: &XmlNode) -> Result<ArticleMeta> {
    let dcx = item
        .find("dcx")
        .ok_or_else(|| HarvestError::parse("article meta", "no dcx metadata block"))?;

    let mut meta = ArticleMeta::default();
    for field in &dcx.children {
        match field.name.as_str() {
            "title" => meta.title = field.trimmed_text().to_string(),
            "identifier" => meta.url = field.trimmed_text().to_string(),
            _ => {}
        }
    }
    meta.page = item
        .find("article-part")
        .and_then(|part| part.attr("pageid"))
        .and_then(page_number);
    Ok(meta)
}

/// OCR document: one `title` element and zero or more `p` paragraphs.
/// Missing paragraph text contributes the empty string.
pub fn parse_ocr_body(doc: &XmlNode) -> ArticleBody {
    let ocr_title = doc
        .find("title")
        .map(|t| t.trimmed_text().to_string())
        .unwrap_or_default();
    let mut text = String::new();
    for p in doc.find_all("p") {
        text.push_str(p.trimmed_text());
    }
    ArticleBody { ocr_title, text }
}

/// Parse a raw record document and extract its issue-level metadata.
pub fn record_source_meta(raw: &str, language: &str) -> Result<Option<SourceMeta>> {
    let root = crate::xml::parse(raw, "record")?;
    let top = issue_item(&root)?;
    let first = top
        .children
        .first()
        .ok_or_else(|| HarvestError::parse("record", "issue item has no children"))?;
    parse_source_meta(first, language)
}

/// Leading numeric run of the trimmed input, or `None` when there is none.
/// `"123 (4e jaargang)"` is 123; `""` and `"abc"` are absent, not zero.
pub fn leading_int(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let digits = &trimmed[..end];
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Page number from a page identifier of the form `...:p<digits>`.
pub fn page_number(pageid: &str) -> Option<i64> {
    let (_, digits) = pageid.rsplit_once(":p")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
