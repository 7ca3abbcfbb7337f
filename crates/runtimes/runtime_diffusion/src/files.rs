//! Locating pipeline component files in a diffusers-layout checkpoint, either
//! in a local directory or through the hub cache.

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiRepo};
use onestep_core::RepoId;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub(crate) enum FileSource {
    Local(PathBuf),
    Hub { repo_id: RepoId, repo: ApiRepo },
}

impl FileSource {
    pub fn local(dir: &Path) -> Self {
        FileSource::Local(dir.to_path_buf())
    }

    pub fn hub(api: &Api, repo_id: &RepoId) -> Self {
        FileSource::Hub {
            repo_id: repo_id.clone(),
            repo: api.model(repo_id.to_string()),
        }
    }

    fn fetch(&self, file: &str) -> Result<PathBuf> {
        match self {
            FileSource::Local(dir) => {
                let path = dir.join(file);
                if !path.exists() {
                    anyhow::bail!("{} not found in {}", file, dir.display());
                }
                Ok(path)
            }
            FileSource::Hub { repo_id, repo } => repo
                .get(file)
                .with_context(|| format!("{} not available from {}", file, repo_id)),
        }
    }

    /// First candidate that exists.
    fn first_of(&self, candidates: &[String]) -> Result<PathBuf> {
        let mut last_err = None;
        for candidate in candidates {
            match self.fetch(candidate) {
                Ok(path) => return Ok(path),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no candidate files given")))
    }

    fn optional(&self, file: &str) -> Option<PathBuf> {
        self.fetch(file).ok()
    }
}

impl std::fmt::Display for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::Local(dir) => write!(f, "{}", dir.display()),
            FileSource::Hub { repo_id, .. } => write!(f, "{}", repo_id),
        }
    }
}

/// Where the denoising network lives: a source plus the folder inside it.
pub(crate) struct UnetLocation<'a> {
    pub source: &'a FileSource,
    pub folder: &'a str,
}

impl<'a> UnetLocation<'a> {
    pub fn subfolder(source: &'a FileSource) -> Self {
        Self {
            source,
            folder: "unet",
        }
    }

    /// A directory that is either a snapshot (with `unet/`) or the UNet itself.
    pub fn graft(source: &'a FileSource, dir: &Path) -> Self {
        let folder = if dir.join("unet").join("config.json").exists() {
            "unet"
        } else {
            ""
        };
        Self { source, folder }
    }

    fn file(&self, name: &str) -> String {
        if self.folder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.folder, name)
        }
    }
}

#[derive(Debug, Deserialize)]
struct VaeConfig {
    #[serde(rename = "_class_name", default)]
    class_name: Option<String>,
    #[serde(default)]
    scaling_factor: Option<f64>,
}

/// Latent scaling of the SD 1.x/2.x autoencoder.
pub(crate) const DEFAULT_VAE_SCALE: f64 = 0.18215;

#[derive(Debug, Clone)]
pub(crate) struct ComponentFiles {
    pub unet_config: PathBuf,
    pub unet_weights: PathBuf,
    pub vae_weights: PathBuf,
    pub vae_scale: f64,
    pub text_encoder_weights: PathBuf,
    pub tokenizer: Option<PathBuf>,
    pub scheduler_config: Option<PathBuf>,
}

fn weight_candidates(folder: &str, stem: &str) -> Vec<String> {
    let prefix = if folder.is_empty() {
        String::new()
    } else {
        format!("{}/", folder)
    };
    vec![
        format!("{}{}.safetensors", prefix, stem),
        format!("{}{}.fp16.safetensors", prefix, stem),
    ]
}

impl ComponentFiles {
    pub fn resolve(unet: UnetLocation<'_>, rest: &FileSource) -> Result<Self> {
        let unet_config = unet.source.fetch(&unet.file("config.json"))?;
        let unet_weights = unet
            .source
            .first_of(&weight_candidates(unet.folder, "diffusion_pytorch_model"))?;

        let (vae_folder, vae_scale) = Self::vae_folder(rest)?;
        let vae_weights = rest.first_of(&weight_candidates(vae_folder, "diffusion_pytorch_model"))?;

        let text_encoder_weights = rest.first_of(&weight_candidates("text_encoder", "model"))?;

        Ok(Self {
            unet_config,
            unet_weights,
            vae_weights,
            vae_scale,
            text_encoder_weights,
            tokenizer: rest.optional("tokenizer/tokenizer.json"),
            scheduler_config: rest.optional("scheduler/scheduler_config.json"),
        })
    }

    /// `vae/` unless it holds a tiny autoencoder, which candle cannot run; then
    /// the full-size `vae_large/` shipped alongside it.
    fn vae_folder(source: &FileSource) -> Result<(&'static str, f64)> {
        let config = match source.optional("vae/config.json") {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                serde_json::from_str::<VaeConfig>(&content)
                    .with_context(|| format!("Malformed VAE config at {:?}", path))?
            }
            None => {
                return Ok(("vae", DEFAULT_VAE_SCALE));
            }
        };

        if config.class_name.as_deref() != Some("AutoencoderTiny") {
            return Ok(("vae", config.scaling_factor.unwrap_or(DEFAULT_VAE_SCALE)));
        }

        tracing::info!("{} ships a tiny VAE, using vae_large", source);
        let large = source
            .optional("vae_large/config.json")
            .context("Tiny VAE without a vae_large fallback")?;
        let content = std::fs::read_to_string(&large)?;
        let large: VaeConfig = serde_json::from_str(&content)?;
        Ok(("vae_large", large.scaling_factor.unwrap_or(DEFAULT_VAE_SCALE)))
    }
}
