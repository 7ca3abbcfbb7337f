//! Candle implementation of `PipelineBackend`.

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use hf_hub::api::sync::{Api, ApiBuilder};
use onestep_core::config::HubConfig;
use onestep_runtime_api::Precision;
use std::path::PathBuf;

use crate::device::device_label;
use crate::files::{ComponentFiles, FileSource, UnetLocation};
use crate::stable_diffusion::StableDiffusionPipeline;
use crate::strategy::LoadStrategy;
use crate::PipelineBackend;

/// Tokenizer used when a checkpoint ships only `vocab.json`/`merges.txt`.
const CLIP_TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";

pub struct CandleBackend {
    device: Device,
    api: Api,
}

impl CandleBackend {
    pub fn new(device: Device, hub: &HubConfig) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_token(hub.token.clone().filter(|t| !t.is_empty()))
            .with_progress(hub.show_progress)
            .build()
            .context("Failed to create hub client")?;
        Ok(Self { device, api })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn clip_tokenizer(&self) -> Result<PathBuf> {
        tracing::info!("Fetching CLIP tokenizer from {}", CLIP_TOKENIZER_REPO);
        self.api
            .model(CLIP_TOKENIZER_REPO.to_string())
            .get("tokenizer.json")
            .context("Failed to fetch CLIP tokenizer")
    }
}

impl PipelineBackend for CandleBackend {
    type Pipeline = StableDiffusionPipeline;

    fn is_accelerated(&self) -> bool {
        !self.device.is_cpu()
    }

    fn device_label(&self) -> String {
        device_label(&self.device)
    }

    fn build(
        &self,
        strategy: &LoadStrategy,
        precision: Precision,
        attention_slice: Option<usize>,
    ) -> Result<StableDiffusionPipeline> {
        let dtype = match precision {
            Precision::F16 => DType::F16,
            Precision::F32 => DType::F32,
        };

        let files = match strategy {
            LoadStrategy::LocalDirectory(path) => {
                let source = FileSource::local(path);
                ComponentFiles::resolve(UnetLocation::subfolder(&source), &source)?
            }
            LoadStrategy::HubRepository(repo_id) => {
                let source = FileSource::hub(&self.api, repo_id);
                ComponentFiles::resolve(UnetLocation::subfolder(&source), &source)?
            }
            LoadStrategy::UnetGraft { base, unet_dir } => {
                let unet = FileSource::local(unet_dir);
                let base = FileSource::hub(&self.api, base);
                ComponentFiles::resolve(UnetLocation::graft(&unet, unet_dir), &base)?
            }
        };
        tracing::debug!("Resolved pipeline files: {:?}", files);

        StableDiffusionPipeline::load(
            strategy.to_string(),
            &files,
            &self.device,
            dtype,
            attention_slice,
            || self.clip_tokenizer(),
        )
    }
}
