use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the harvester.
///
/// `Config` and `Storage` are fatal: the run aborts before (or instead of)
/// touching the tables. `TransientFetch` and `Parse` affect single records
/// and are logged and skipped by the calling stage.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch failed after {attempts} attempt(s): {url}: {reason}")]
    TransientFetch {
        url: String,
        attempts: usize,
        reason: String,
    },

    #[error("malformed record ({context}): {reason}")]
    Parse { context: String, reason: String },

    #[error("storage error in {path:?}: {reason}")]
    Storage { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl HarvestError {
    pub fn parse(context: impl Into<String>, reason: impl Into<String>) -> Self {
        HarvestError::Parse {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HarvestError::Storage {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
