//! Stable Diffusion 1.x/2.x pipeline implementation
//!
//! Wraps candle-transformers' stable_diffusion module for image generation.

use anyhow::Result;
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::stable_diffusion::schedulers::{Scheduler, SchedulerConfig};
use candle_transformers::models::stable_diffusion::{
    self, clip, unet_2d::UNet2DConditionModel, unet_2d::UNet2DConditionModelConfig, vae,
    StableDiffusionConfig,
};
use onestep_runtime_api::{
    DiffusionPipeline, ImageGenRequest, ImageGenResponse, SchedulerSettings, SchedulerSpec,
};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::files::ComponentFiles;
use crate::sampler::{build_scheduler, scheduler_config};
use crate::unet_config::UnetConfig;

/// Latent space is 8x smaller than pixel space.
const VAE_DOWNSCALE: usize = 8;

/// Stable Diffusion generation pipeline
pub struct StableDiffusionPipeline {
    name: String,
    device: Device,
    dtype: DType,
    tokenizer: Tokenizer,
    pad_id: u32,
    clip_config: clip::Config,
    text_model: clip::ClipTextTransformer,
    unet: UNet2DConditionModel,
    sliced_attention: Option<usize>,
    unet_channels: (usize, usize),
    vae: vae::AutoEncoderKL,
    vae_scale: f64,
    scheduler: SchedulerSpec,
}

fn build_unet(
    weights: &Path,
    channels: (usize, usize),
    config: UNet2DConditionModelConfig,
    device: &Device,
    dtype: DType,
) -> Result<UNet2DConditionModel> {
    let vs = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], dtype, device)? };
    Ok(UNet2DConditionModel::new(vs, channels.0, channels.1, false, config)?)
}

/// candle fixes sliced attention when the UNet is constructed.
fn check_slice_size(built_with: Option<usize>, requested: usize) -> Result<()> {
    if built_with == Some(requested) {
        return Ok(());
    }
    anyhow::bail!(
        "UNet was built with slice size {:?}; reload with {} to change it",
        built_with,
        requested
    )
}

impl StableDiffusionPipeline {
    /// Load the pipeline from resolved component files. `clip_tokenizer` is
    /// consulted when the checkpoint ships no `tokenizer.json`.
    pub(crate) fn load(
        name: String,
        files: &ComponentFiles,
        device: &Device,
        dtype: DType,
        attention_slice: Option<usize>,
        clip_tokenizer: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<Self> {
        // UNet
        let unet_cfg = UnetConfig::from_file(&files.unet_config)?;
        let sd_config = match unet_cfg.cross_attention_dim {
            768 => StableDiffusionConfig::v1_5(None, None, None),
            1024 => StableDiffusionConfig::v2_1(None, None, None),
            other => anyhow::bail!("Unsupported cross-attention width {}", other),
        };
        let unet_config = unet_cfg.to_candle(attention_slice)?;
        let unet_channels = (unet_cfg.in_channels, unet_cfg.out_channels);
        let unet = build_unet(&files.unet_weights, unet_channels, unet_config, device, dtype)?;

        // VAE
        let vae = sd_config.build_vae(&files.vae_weights, device, dtype)?;

        // Text encoder
        let clip_config = sd_config.clip.clone();
        let text_model = stable_diffusion::build_clip_transformer(
            &clip_config,
            &files.text_encoder_weights,
            device,
            dtype,
        )?;

        // Tokenizer
        let tokenizer_path = match &files.tokenizer {
            Some(path) => path.clone(),
            None => clip_tokenizer()?,
        };
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        let pad_token = clip_config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = tokenizer
            .get_vocab(true)
            .get(pad_token)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Tokenizer has no '{}' token", pad_token))?;

        // Scheduler
        let settings = match &files.scheduler_config {
            Some(path) => SchedulerSettings::from_file(path)?,
            None => SchedulerSettings::default(),
        };
        let scheduler = SchedulerSpec::from_settings(&settings)?;

        Ok(Self {
            name,
            device: device.clone(),
            dtype,
            tokenizer,
            pad_id,
            clip_config,
            text_model,
            unet,
            sliced_attention: attention_slice,
            unet_channels,
            vae,
            vae_scale: files.vae_scale,
            scheduler,
        })
    }

    fn text_embeddings(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?
            .get_ids()
            .to_vec();

        let max_len = self.clip_config.max_position_embeddings;
        if tokens.len() > max_len {
            tracing::warn!("Prompt is {} tokens, truncating to {}", tokens.len(), max_len);
            tokens.truncate(max_len);
        }
        tokens.resize(max_len, self.pad_id);

        let input_ids = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&input_ids)?)
    }

    /// Generate image from request
    fn generate_internal(&self, request: &ImageGenRequest) -> Result<ImageGenResponse> {
        request.validate()?;
        let guided = request.uses_guidance();

        if let Some(seed) = request.seed {
            if let Err(e) = self.device.set_seed(seed) {
                tracing::warn!("Could not seed the device rng: {}", e);
            }
        }

        let cond = self.text_embeddings(&request.prompt)?;
        let embeddings = if guided {
            let negative = request.negative_prompt.as_deref().unwrap_or("");
            let uncond = self.text_embeddings(negative)?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };

        let mut scheduler = build_scheduler(&self.scheduler, request.steps as usize)?;
        let latent_h = request.height as usize / VAE_DOWNSCALE;
        let latent_w = request.width as usize / VAE_DOWNSCALE;
        let noise = Tensor::randn(
            0f32,
            1f32,
            (1, self.unet_channels.0, latent_h, latent_w),
            &self.device,
        )?;
        let mut latents = (noise * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        // Denoising loop
        let timesteps = scheduler.timesteps().to_vec();
        for (step, &timestep) in timesteps.iter().enumerate() {
            let model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &embeddings)?;

            let noise_pred = if guided {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                (uncond + ((cond - uncond)? * request.guidance_scale as f64)?)?
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::debug!("step {}/{} done (t={})", step + 1, timesteps.len(), timestep);
        }

        // VAE decode
        let image = self.vae.decode(&(latents / self.vae_scale)?)?;
        let image = ((image / 2.)? + 0.5)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?;
        let image = (image.clamp(0f32, 1f32)? * 255.)?
            .to_dtype(DType::U8)?
            .i(0)?;

        let (c, h, w) = image.dims3()?;
        if c != 3 {
            anyhow::bail!("Expected 3 channels, got {}", c);
        }
        let pixels: Vec<u8> = image.permute((1, 2, 0))?.flatten_all()?.to_vec1()?;

        Ok(ImageGenResponse {
            pixels,
            width: w as u32,
            height: h as u32,
        })
    }
}

impl DiffusionPipeline for StableDiffusionPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn scheduler(&self) -> &SchedulerSpec {
        &self.scheduler
    }

    fn set_scheduler(&mut self, spec: SchedulerSpec) -> Result<()> {
        // Building once surfaces configurations candle rejects.
        scheduler_config(&spec).build(1)?;
        self.scheduler = spec;
        Ok(())
    }

    fn enable_attention_slicing(&mut self, slice_size: usize) -> Result<()> {
        check_slice_size(self.sliced_attention, slice_size)?;
        tracing::debug!("Attention slicing enabled (slice size {})", slice_size);
        Ok(())
    }

    fn generate(&self, request: &ImageGenRequest) -> Result<ImageGenResponse> {
        self.generate_internal(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slicing_matches_the_built_unet() {
        assert!(check_slice_size(Some(1), 1).is_ok());
    }

    #[test]
    fn slicing_cannot_change_after_construction() {
        let err = check_slice_size(None, 1).unwrap_err();
        assert!(err.to_string().contains("reload with 1"));
        assert!(check_slice_size(Some(2), 1).is_err());
    }
}
