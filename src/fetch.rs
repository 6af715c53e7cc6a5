//! HTTP access to the remote library: OAI-PMH catalog listing, full-record
//! retrieval and the OCR resolver. All requests share one retry policy.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::xml;

const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierHeader {
    pub identifier: String,
    pub datestamp: DateTime<Utc>,
}

/// One page of a `ListIdentifiers` response.
#[derive(Debug, Clone, Default)]
pub struct IdentifierPage {
    pub headers: Vec<IdentifierHeader>,
    pub resumption_token: Option<String>,
}

/// The remote catalog: identifier listing plus full-record retrieval.
/// Implemented by [`OaiClient`]; tests substitute in-memory sources.
#[allow(async_fn_in_trait)]
pub trait RecordSource {
    /// One page of (identifier, datestamp) headers for `set`, starting at
    /// `from`, continuing from `token` when given.
    async fn identifier_page(
        &self,
        set: &str,
        from: &str,
        token: Option<&str>,
    ) -> Result<IdentifierPage>;

    /// The full raw record document for one identifier.
    async fn record(&self, identifier: &str) -> Result<String>;
}

/// The OCR resolver: per-article body documents.
#[allow(async_fn_in_trait)]
pub trait OcrSource {
    async fn ocr_document(&self, identifier: &str) -> Result<String>;
}

pub struct OaiClient {
    http: Client,
    endpoint: Url,
    resolver: Url,
}

impl OaiClient {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            endpoint: config.endpoint()?,
            resolver: config.resolver()?,
        })
    }

    /// GET with bounded retry: transient failures (connect errors, 5xx) are
    /// retried with a fixed delay; anything else fails immediately.
    async fn get_text(&self, url: Url) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) => return Ok(body),
                    Err(e) if attempt < MAX_RETRIES => {
                        warn!(%url, attempt, error = %e, "body read failed; retrying");
                        sleep(RETRY_DELAY).await;
                    }
                    Err(e) => return Err(transient(&url, attempt, e.to_string())),
                },
                Ok(resp) if resp.status().is_server_error() && attempt < MAX_RETRIES => {
                    warn!(%url, attempt, status = %resp.status(), "server error; retrying");
                    sleep(RETRY_DELAY).await;
                }
                Ok(resp) => {
                    return Err(transient(
                        &url,
                        attempt,
                        format!("HTTP status {}", resp.status()),
                    ));
                }
                Err(e) if attempt < MAX_RETRIES => {
                    warn!(%url, attempt, error = %e, "request failed; retrying");
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(transient(&url, attempt, e.to_string())),
            }
        }
    }

    fn verb_url(&self, pairs: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().extend_pairs(pairs.iter().copied());
        url
    }
}

fn transient(url: &Url, attempts: usize, reason: String) -> HarvestError {
    HarvestError::TransientFetch {
        url: url.to_string(),
        attempts,
        reason,
    }
}

impl RecordSource for OaiClient {
    async fn identifier_page(
        &self,
        set: &str,
        from: &str,
        token: Option<&str>,
    ) -> Result<IdentifierPage> {
        let url = match token {
            Some(token) => {
                self.verb_url(&[("verb", "ListIdentifiers"), ("resumptionToken", token)])
            }
            None => self.verb_url(&[
                ("verb", "ListIdentifiers"),
                ("metadataPrefix", "didl"),
                ("set", set),
                ("from", from),
            ]),
        };
        let body = self.get_text(url).await?;
        parse_identifier_page(&body)
    }

    async fn record(&self, identifier: &str) -> Result<String> {
        let url = self.verb_url(&[
            ("verb", "GetRecord"),
            ("metadataPrefix", "didl"),
            ("identifier", identifier),
        ]);
        self.get_text(url).await
    }
}

impl OcrSource for OaiClient {
    async fn ocr_document(&self, identifier: &str) -> Result<String> {
        let mut url = self.resolver.clone();
        url.set_query(Some(&format!("urn={identifier}:ocr")));
        self.get_text(url).await
    }
}

fn parse_identifier_page(body: &str) -> Result<IdentifierPage> {
    let root = xml::parse(body, "ListIdentifiers response")?;

    if let Some(error) = root.find("error") {
        // An exhausted window is a normal empty page, not a failure.
        if error.attr("code") == Some("noRecordsMatch") {
            return Ok(IdentifierPage::default());
        }
        return Err(HarvestError::parse(
            "ListIdentifiers response",
            format!(
                "OAI error {}: {}",
                error.attr("code").unwrap_or("unknown"),
                error.trimmed_text()
            ),
        ));
    }

    let list = root.find("ListIdentifiers").ok_or_else(|| {
        HarvestError::parse("ListIdentifiers response", "no ListIdentifiers element")
    })?;

    let mut headers = Vec::new();
    for header in list.find_all("header") {
        if header.attr("status") == Some("deleted") {
            continue;
        }
        let identifier = header
            .find("identifier")
            .map(|n| n.trimmed_text().to_string())
            .unwrap_or_default();
        if identifier.is_empty() {
            continue;
        }
        let raw_stamp = header
            .find("datestamp")
            .map(|n| n.trimmed_text().to_string())
            .unwrap_or_default();
        let datestamp = parse_datestamp(&raw_stamp).ok_or_else(|| {
            HarvestError::parse(
                "ListIdentifiers response",
                format!("bad datestamp {raw_stamp:?} for {identifier}"),
            )
        })?;
        headers.push(IdentifierHeader {
            identifier,
            datestamp,
        });
    }

    let resumption_token = list
        .find("resumptionToken")
        .map(|n| n.trimmed_text().to_string())
        .filter(|t| !t.is_empty());

    Ok(IdentifierPage {
        headers,
        resumption_token,
    })
}

/// OAI datestamps come in second granularity (RFC 3339) or day granularity.
pub fn parse_datestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAGE: &str = r#"<?xml version="1.0"?>
        <OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
          <ListIdentifiers>
            <header>
              <identifier>ddd:0001:mpeg21</identifier>
              <datestamp>2020-01-02T03:04:05Z</datestamp>
            </header>
            <header status="deleted">
              <identifier>ddd:0002:mpeg21</identifier>
              <datestamp>2020-01-03</datestamp>
            </header>
            <header>
              <identifier>ddd:0003:mpeg21</identifier>
              <datestamp>2020-01-04</datestamp>
            </header>
            <resumptionToken>token-1</resumptionToken>
          </ListIdentifiers>
        </OAI-PMH>"#;

    #[test]
    fn page_parsing_skips_deleted() {
        let page = parse_identifier_page(PAGE).unwrap();
        assert_eq!(page.headers.len(), 2);
        assert_eq!(page.headers[0].identifier, "ddd:0001:mpeg21");
        assert_eq!(page.headers[1].identifier, "ddd:0003:mpeg21");
        assert_eq!(page.resumption_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn empty_resumption_token_ends_paging() {
        let body = PAGE.replace("token-1", "");
        let page = parse_identifier_page(&body).unwrap();
        assert_eq!(page.resumption_token, None);
    }

    #[test]
    fn no_records_match_is_an_empty_page() {
        let body = r#"<OAI-PMH><error code="noRecordsMatch">nothing</error></OAI-PMH>"#;
        let page = parse_identifier_page(body).unwrap();
        assert!(page.headers.is_empty());
        assert!(page.resumption_token.is_none());
    }

    #[test]
    fn other_oai_errors_fail() {
        let body = r#"<OAI-PMH><error code="badArgument">oops</error></OAI-PMH>"#;
        assert!(parse_identifier_page(body).is_err());
    }

    #[test]
    fn datestamp_granularities() {
        assert_eq!(
            parse_datestamp("2020-01-02T03:04:05Z").unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()
        );
        assert_eq!(
            parse_datestamp("2020-01-02").unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap()
        );
        assert!(parse_datestamp("last tuesday").is_none());
    }
}
