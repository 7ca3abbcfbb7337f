//! Repository fetcher: turns a model reference into a directory on disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{CompletenessPolicy, Config};
use crate::downloaders::{Downloader, HuggingFaceDownloader, SnapshotManifest};
use crate::error::{Error, Result};
use crate::reference::RepoId;

pub struct RepositoryFetcher<D = HuggingFaceDownloader> {
    models_dir: PathBuf,
    policy: CompletenessPolicy,
    downloader: D,
}

/// A model directory found in the local store.
#[derive(Debug, Clone)]
pub struct LocalModel {
    pub dir_name: String,
    pub path: PathBuf,
    /// `None` when the snapshot never finished downloading.
    pub manifest: Option<SnapshotManifest>,
}

impl RepositoryFetcher<HuggingFaceDownloader> {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.models_dir(),
            config.models.completeness,
            HuggingFaceDownloader::new(&config.hub)?,
        ))
    }
}

impl<D: Downloader> RepositoryFetcher<D> {
    pub fn new(models_dir: impl Into<PathBuf>, policy: CompletenessPolicy, downloader: D) -> Self {
        Self {
            models_dir: models_dir.into(),
            policy,
            downloader,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn resolve(&self, reference: &str) -> Result<RepoId> {
        RepoId::resolve(reference)
    }

    pub fn local_path(&self, repo_id: &RepoId) -> PathBuf {
        self.models_dir.join(repo_id.dir_name())
    }

    fn is_present(&self, model_path: &Path) -> bool {
        match self.policy {
            CompletenessPolicy::Existence => model_path.exists(),
            CompletenessPolicy::Manifest => matches!(SnapshotManifest::read(model_path), Ok(Some(_))),
        }
    }

    /// Make sure every file of `repo_id` is on disk and return its directory.
    pub async fn ensure_downloaded(&self, repo_id: &RepoId) -> Result<PathBuf> {
        let model_path = self.local_path(repo_id);

        if self.is_present(&model_path) {
            tracing::info!(
                "Model {} already downloaded at {}",
                repo_id,
                model_path.display()
            );
            return Ok(model_path);
        }

        if model_path.exists() {
            tracing::warn!(
                "{} has no snapshot manifest, resuming download",
                model_path.display()
            );
        } else {
            tracing::info!("Downloading model {} from the hub...", repo_id);
        }

        let manifest = match self.downloader.download_snapshot(repo_id, &model_path).await {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::error!("Error downloading model {}: {:#}", repo_id, e);
                return Err(Error::download(repo_id, e));
            }
        };

        if let Err(e) = manifest.write(&model_path) {
            tracing::error!("Could not record snapshot manifest: {:#}", e);
            return Err(Error::download(repo_id, e));
        }

        tracing::info!(
            "Model downloaded successfully to {} ({} files, {:.2} GB)",
            model_path.display(),
            manifest.files.len(),
            manifest.total_bytes() as f64 / 1_073_741_824.0
        );
        Ok(model_path)
    }

    /// List model directories in the store, complete or not.
    pub fn local_models(&self) -> Result<Vec<LocalModel>> {
        if !self.models_dir.exists() {
            return Ok(Vec::new());
        }

        let mut models = Vec::new();
        for entry in fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let manifest = SnapshotManifest::read(&path).unwrap_or_else(|e| {
                tracing::warn!("Unreadable manifest in {}: {:#}", path.display(), e);
                None
            });
            models.push(LocalModel {
                dir_name: entry.file_name().to_string_lossy().into_owned(),
                path,
                manifest,
            });
        }
        models.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(models)
    }

    /// Delete the local copy of `repo_id`. Returns whether anything was removed.
    pub fn remove(&self, repo_id: &RepoId) -> Result<bool> {
        let model_path = self.local_path(repo_id);
        if !model_path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&model_path)?;
        tracing::info!("Removed {}", model_path.display());
        Ok(true)
    }
}
