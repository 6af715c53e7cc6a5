use std::path::PathBuf;

use chrono::NaiveDate;
use url::Url;

use crate::error::{HarvestError, Result};

pub const DEFAULT_OAI_BASE: &str = "http://services.kb.nl/mdo/oai/";
pub const DEFAULT_RESOLVER_BASE: &str = "http://resolver.kb.nl/resolve";
pub const DEFAULT_SET: &str = "DDD";
pub const DEFAULT_LANGUAGE: &str = "nl";

/// One configuration object built in `main` and passed to every stage;
/// no process-wide singletons.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub oai_base: String,
    pub resolver_base: String,
    /// API key (needed for material after 1945). Appended to the service
    /// endpoint path, not sent as a header.
    pub api_key: Option<String>,
    pub set: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub out_dir: PathBuf,
    /// Issues whose metadata declares a different language are discarded.
    pub language: String,
}

impl HarvestConfig {
    /// The OAI endpoint, with the API key appended to the path when supplied.
    pub fn endpoint(&self) -> Result<Url> {
        let mut raw = self.oai_base.clone();
        if let Some(key) = &self.api_key {
            if !raw.ends_with('/') {
                raw.push('/');
            }
            raw.push_str(key);
        }
        Url::parse(&raw)
            .map_err(|e| HarvestError::Config(format!("invalid OAI endpoint {raw:?}: {e}")))
    }

    pub fn resolver(&self) -> Result<Url> {
        Url::parse(&self.resolver_base).map_err(|e| {
            HarvestError::Config(format!(
                "invalid resolver endpoint {:?}: {e}",
                self.resolver_base
            ))
        })
    }
}

/// Parse a `YYYY-MM-DD` CLI date. Fails before any I/O happens.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| HarvestError::Config(format!("invalid date {s:?}, expected YYYY-MM-DD")))
}
