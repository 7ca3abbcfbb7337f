use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::reference::RepoId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced at the boundary of the fetcher and the loader.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not parse a repo id from '{reference}'")]
    InvalidReference { reference: String },

    #[error("failed to download model {repo_id}: {source:#}")]
    DownloadFailed {
        repo_id: RepoId,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load model {repo_id}: {}", summarize(.attempts))]
    ModelLoadFailed {
        repo_id: RepoId,
        attempts: Vec<LoadAttempt>,
    },

    #[error("no model loaded")]
    NoModelLoaded,

    #[error("invalid configuration at {path:?}: {message}")]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One failed pipeline construction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadAttempt {
    pub strategy: String,
    pub cause: String,
}

impl fmt::Display for LoadAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.cause)
    }
}

fn summarize(attempts: &[LoadAttempt]) -> String {
    if attempts.is_empty() {
        return "no loading strategy was attempted".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn download(repo_id: &RepoId, source: anyhow::Error) -> Self {
        Error::DownloadFailed {
            repo_id: repo_id.clone(),
            source,
        }
    }
}
