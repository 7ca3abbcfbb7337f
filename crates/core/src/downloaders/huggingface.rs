use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{AUTHORIZATION, RANGE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::{Downloader, SnapshotFile, SnapshotManifest, PARTIAL_SUFFIX};
use crate::config::HubConfig;
use crate::reference::RepoId;

const USER_AGENT: &str = concat!("onestep/", env!("CARGO_PKG_VERSION"));

pub struct HuggingFaceDownloader {
    client: Client,
    endpoint: String,
    token: Option<String>,
    show_progress: bool,
}

#[derive(Debug, Deserialize)]
pub struct HfModelInfo {
    pub id: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub siblings: Vec<HfSibling>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HfSibling {
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl HuggingFaceDownloader {
    pub fn new(hub: &HubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: hub.endpoint.trim_end_matches('/').to_string(),
            token: hub.token.clone().filter(|t| !t.is_empty()),
            show_progress: hub.show_progress,
        })
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    pub async fn get_model_info(&self, repo_id: &RepoId) -> Result<HfModelInfo> {
        let url = format!("{}/api/models/{}?blobs=true", self.endpoint, repo_id);

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch model info")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Model '{}' not available on the hub ({})",
                repo_id,
                response.status()
            );
        }

        let info: HfModelInfo = response.json().await.context("Malformed model info")?;
        Ok(info)
    }

    fn progress_bar(&self, total_size: u64, filename: &str) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let pb = ProgressBar::new(total_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_message(filename.to_string());
        Ok(pb)
    }

    fn request_file(&self, url: &str, offset: u64) -> RequestBuilder {
        let request = self.get(url);
        if offset > 0 {
            request.header(RANGE, format!("bytes={}-", offset))
        } else {
            request
        }
    }

    async fn download_file(
        &self,
        repo_id: &RepoId,
        revision: &str,
        sibling: &HfSibling,
        dest_dir: &Path,
    ) -> Result<u64> {
        let filename = sibling.rfilename.as_str();
        let dest_path = dest_dir.join(snapshot_relative_path(filename)?);

        if let Ok(meta) = fs::metadata(&dest_path) {
            if sibling.size.map_or(true, |size| size == meta.len()) {
                tracing::debug!("{} already present, skipping", filename);
                return Ok(meta.len());
            }
        }

        // Create subdirectories if needed
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let part_path = partial_path(&dest_path);
        let mut offset = fs::metadata(&part_path).map(|m| m.len()).unwrap_or(0);
        if sibling.size.is_some_and(|size| offset > size) {
            tracing::warn!("Partial {} is larger than the listed size, restarting", filename);
            fs::remove_file(&part_path)?;
            offset = 0;
        }

        let url = format!("{}/{}/resolve/{}/{}", self.endpoint, repo_id, revision, filename);
        if offset > 0 {
            tracing::info!("Resuming {} from byte {}", filename, offset);
        }
        let mut response = self
            .request_file(&url, offset)
            .send()
            .await
            .context("Failed to start download")?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            if sibling.size == Some(offset) {
                fs::rename(&part_path, &dest_path)?;
                return Ok(offset);
            }
            tracing::warn!("Server rejected resume of {}, restarting", filename);
            fs::remove_file(&part_path)?;
            offset = 0;
            response = self
                .request_file(&url, offset)
                .send()
                .await
                .context("Failed to start download")?;
        }

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Failed to download {}: {}", filename, status);
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let mut file = if resumed {
            OpenOptions::new().append(true).open(&part_path)?
        } else {
            File::create(&part_path)?
        };
        let mut downloaded: u64 = if resumed { offset } else { 0 };

        let total_size = response
            .content_length()
            .map(|len| len + downloaded)
            .or(sibling.size)
            .unwrap_or(0);
        let pb = self.progress_bar(total_size, filename)?;
        pb.set_position(downloaded);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error downloading chunk")?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        file.flush()?;
        drop(file);

        if let Some(expected) = sibling.size {
            if expected != downloaded {
                pb.abandon_with_message(format!("{} incomplete", filename));
                anyhow::bail!(
                    "Download of {} ended at {} of {} bytes",
                    filename,
                    downloaded,
                    expected
                );
            }
        }

        fs::rename(&part_path, &dest_path)?;
        pb.finish_with_message(format!("Downloaded {}", filename));
        Ok(downloaded)
    }
}

/// Listing entries must stay inside the snapshot directory.
fn snapshot_relative_path(rfilename: &str) -> Result<&Path> {
    let path = Path::new(rfilename);
    let inside = !rfilename.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        anyhow::bail!("Refusing to write '{}' outside the model directory", rfilename);
    }
    Ok(path)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[async_trait]
impl Downloader for HuggingFaceDownloader {
    async fn download_snapshot(&self, repo_id: &RepoId, dest: &Path) -> Result<SnapshotManifest> {
        tracing::info!("Fetching file listing for {}", repo_id);
        let hf_info = self.get_model_info(repo_id).await?;

        if hf_info.siblings.is_empty() {
            anyhow::bail!("Repository '{}' lists no files", hf_info.id);
        }

        for sibling in &hf_info.siblings {
            snapshot_relative_path(&sibling.rfilename)?;
        }
        let revision = hf_info.sha.as_deref().unwrap_or("main");

        fs::create_dir_all(dest)?;
        tracing::info!(
            "Downloading {} file(s) to {}",
            hf_info.siblings.len(),
            dest.display()
        );

        let mut files = Vec::with_capacity(hf_info.siblings.len());
        for sibling in &hf_info.siblings {
            let size = self
                .download_file(repo_id, revision, sibling, dest)
                .await
                .with_context(|| format!("while fetching {}", sibling.rfilename))?;
            files.push(SnapshotFile {
                path: sibling.rfilename.clone(),
                size,
            });
        }

        Ok(SnapshotManifest {
            repo_id: repo_id.clone(),
            revision: hf_info.sha.clone(),
            files,
            downloaded_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hub(server: &MockServer, token: Option<&str>) -> HuggingFaceDownloader {
        HuggingFaceDownloader::new(&HubConfig {
            endpoint: server.uri(),
            token: token.map(str::to_string),
            show_progress: false,
        })
        .unwrap()
    }

    async fn mount_listing(server: &MockServer, repo: &str, files: &[(&str, usize)]) {
        let siblings: Vec<_> = files
            .iter()
            .map(|(name, size)| json!({ "rfilename": name, "size": size }))
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/api/models/{}", repo)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": repo,
                "sha": "abc123",
                "siblings": siblings,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn downloads_every_file_including_nested_ones() {
        let server = MockServer::start().await;
        let repo: RepoId = "IDKiro/sdxs-512-0.9".parse().unwrap();
        mount_listing(
            &server,
            "IDKiro/sdxs-512-0.9",
            &[("model_index.json", 2), ("unet/config.json", 4)],
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/IDKiro/sdxs-512-0.9/resolve/abc123/model_index.json"))
            .and(header("authorization", "Bearer hf_test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/IDKiro/sdxs-512-0.9/resolve/abc123/unet/config.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unet".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let manifest = hub(&server, Some("hf_test"))
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();

        assert_eq!(manifest.revision.as_deref(), Some("abc123"));
        assert_eq!(manifest.total_bytes(), 6);
        assert_eq!(fs::read(dest.path().join("unet/config.json")).unwrap(), b"unet");
        assert!(!dest.path().join("unet/config.json.part").exists());
    }

    #[tokio::test]
    async fn interrupted_file_is_resumed_with_a_range_request() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("weights.bin", 10)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .and(header("range", "bytes=4-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"456789".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("weights.bin.part"), b"0123").unwrap();

        hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();

        assert_eq!(
            fs::read(dest.path().join("weights.bin")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn oversized_partial_file_is_discarded_before_requesting() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("weights.bin", 4)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .and(header_exists("range"))
            .respond_with(ResponseTemplate::new(416))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abcd".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("weights.bin.part"), b"0123456789").unwrap();

        hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();

        assert_eq!(fs::read(dest.path().join("weights.bin")).unwrap(), b"abcd");
        assert!(!dest.path().join("weights.bin.part").exists());
    }

    #[tokio::test]
    async fn rejected_resume_restarts_without_range() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("weights.bin", 10)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .and(header("range", "bytes=4-"))
            .respond_with(ResponseTemplate::new(416))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("weights.bin.part"), b"wxyz").unwrap();

        hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();

        assert_eq!(
            fs::read(dest.path().join("weights.bin")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn complete_partial_file_is_promoted_on_416() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("weights.bin", 4)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .and(header("range", "bytes=4-"))
            .respond_with(ResponseTemplate::new(416))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("weights.bin.part"), b"0123").unwrap();

        let manifest = hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();

        assert_eq!(manifest.total_bytes(), 4);
        assert_eq!(fs::read(dest.path().join("weights.bin")).unwrap(), b"0123");
        assert!(!dest.path().join("weights.bin.part").exists());
    }

    #[tokio::test]
    async fn listing_entries_cannot_escape_the_model_directory() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(
            &server,
            "owner/model",
            &[("config.json", 2), ("../escaped.txt", 3)],
        )
        .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bad".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("model");

        let err = hub(&server, None)
            .download_snapshot(&repo, &dest)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("outside the model directory"));
        assert!(!root.path().join("escaped.txt").exists());
        assert!(!dest.join("config.json").exists());
    }

    #[test]
    fn absolute_and_parent_paths_are_rejected() {
        assert!(snapshot_relative_path("unet/config.json").is_ok());
        assert!(snapshot_relative_path("./model_index.json").is_ok());
        assert!(snapshot_relative_path("/etc/passwd").is_err());
        assert!(snapshot_relative_path("unet/../../x").is_err());
        assert!(snapshot_relative_path("").is_err());
    }

    #[tokio::test]
    async fn listing_without_sha_downloads_from_main() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        Mock::given(method("GET"))
            .and(path("/api/models/owner/model"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "owner/model",
                "siblings": [{ "rfilename": "a.txt", "size": 1 }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/main/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let manifest = hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();
        assert_eq!(manifest.revision, None);
    }

    #[tokio::test]
    async fn server_ignoring_range_restarts_the_file() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("weights.bin", 10)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("weights.bin.part"), b"xx").unwrap();

        hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();

        assert_eq!(
            fs::read(dest.path().join("weights.bin")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn complete_files_are_not_fetched_again() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("a.txt", 3), ("b.txt", 3)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"aaa".to_vec()))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/b.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bbb".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("a.txt"), b"aaa").unwrap();

        let manifest = hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap();
        assert_eq!(manifest.files.len(), 2);
    }

    #[tokio::test]
    async fn truncated_body_keeps_the_partial_file() {
        let server = MockServer::start().await;
        let repo: RepoId = "owner/model".parse().unwrap();
        mount_listing(&server, "owner/model", &[("weights.bin", 10)]).await;
        Mock::given(method("GET"))
            .and(path("/owner/model/resolve/abc123/weights.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123".to_vec()))
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let err = hub(&server, None)
            .download_snapshot(&repo, dest.path())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("ended at 4 of 10 bytes"));
        assert!(!dest.path().join("weights.bin").exists());
        assert_eq!(fs::read(dest.path().join("weights.bin.part")).unwrap(), b"0123");
    }

    #[tokio::test]
    async fn unknown_repository_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/ghost/model"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let err = hub(&server, None)
            .download_snapshot(&"ghost/model".parse().unwrap(), dest.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not available on the hub"));
    }
}
