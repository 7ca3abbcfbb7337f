pub mod huggingface;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::reference::RepoId;

/// Written into a model directory once every file of the snapshot is on disk.
pub const MANIFEST_FILE: &str = ".onestep-snapshot.json";

/// Suffix of files that are still being transferred.
pub const PARTIAL_SUFFIX: &str = ".part";

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch every file of `repo` into `dest`, continuing interrupted transfers.
    async fn download_snapshot(&self, repo: &RepoId, dest: &Path) -> Result<SnapshotManifest>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: String,
    pub size: u64,
}

/// Record of a fully downloaded snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub repo_id: RepoId,
    #[serde(default)]
    pub revision: Option<String>,
    pub files: Vec<SnapshotFile>,
    pub downloaded_at: DateTime<Utc>,
}

impl SnapshotManifest {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn read(model_dir: &Path) -> Result<Option<Self>> {
        let path = model_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn write(&self, model_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(model_dir.join(MANIFEST_FILE), content)?;
        Ok(())
    }
}

pub use huggingface::HuggingFaceDownloader;
