//! Reads a diffusers `unet/config.json` into candle's UNet configuration, so
//! pruned or resized SD 1.x/2.x UNets load without a hardcoded layout.

use anyhow::{Context, Result};
use candle_transformers::models::stable_diffusion::unet_2d::{
    BlockConfig, UNet2DConditionModelConfig,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PerBlock {
    Shared(usize),
    Each(Vec<usize>),
}

impl PerBlock {
    fn get(&self, index: usize) -> Option<usize> {
        match self {
            PerBlock::Shared(v) => Some(*v),
            PerBlock::Each(values) => values.get(index).copied(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UnetConfig {
    #[serde(default = "default_latent_channels")]
    pub in_channels: usize,
    #[serde(default = "default_latent_channels")]
    pub out_channels: usize,
    block_out_channels: Vec<usize>,
    down_block_types: Vec<String>,
    #[serde(default = "default_layers_per_block")]
    layers_per_block: usize,
    #[serde(default = "default_head_dim")]
    attention_head_dim: PerBlock,
    #[serde(default)]
    transformer_layers_per_block: Option<PerBlock>,
    #[serde(default = "default_cross_attention_dim")]
    pub cross_attention_dim: usize,
    #[serde(default = "default_norm_num_groups")]
    norm_num_groups: usize,
    #[serde(default = "default_norm_eps")]
    norm_eps: f64,
    #[serde(default)]
    use_linear_projection: bool,
    #[serde(default = "default_downsample_padding")]
    downsample_padding: usize,
    #[serde(default = "default_mid_block_scale_factor")]
    mid_block_scale_factor: f64,
    #[serde(default = "default_true")]
    flip_sin_to_cos: bool,
    #[serde(default)]
    freq_shift: f64,
    #[serde(default)]
    center_input_sample: bool,
    #[serde(default)]
    addition_embed_type: Option<String>,
}

fn default_latent_channels() -> usize {
    4
}

fn default_layers_per_block() -> usize {
    2
}

fn default_head_dim() -> PerBlock {
    PerBlock::Shared(8)
}

fn default_cross_attention_dim() -> usize {
    768
}

fn default_norm_num_groups() -> usize {
    32
}

fn default_norm_eps() -> f64 {
    1e-5
}

fn default_downsample_padding() -> usize {
    1
}

fn default_mid_block_scale_factor() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl UnetConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("UNet config not found at {:?}", path))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).context("Malformed UNet config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(kind) = &self.addition_embed_type {
            anyhow::bail!("UNets with '{}' added conditioning are not supported", kind);
        }
        if self.block_out_channels.is_empty() {
            anyhow::bail!("UNet config lists no blocks");
        }
        if self.block_out_channels.len() != self.down_block_types.len() {
            anyhow::bail!(
                "UNet config has {} block widths but {} down blocks",
                self.block_out_channels.len(),
                self.down_block_types.len()
            );
        }
        Ok(())
    }

    pub fn to_candle(&self, sliced_attention_size: Option<usize>) -> Result<UNet2DConditionModelConfig> {
        let blocks = self
            .block_out_channels
            .iter()
            .zip(&self.down_block_types)
            .enumerate()
            .map(|(i, (&out_channels, block_type))| {
                let attention_head_dim = self
                    .attention_head_dim
                    .get(i)
                    .with_context(|| format!("No attention head dim for block {}", i))?;
                let use_cross_attn = if block_type.contains("CrossAttn") {
                    let layers = match &self.transformer_layers_per_block {
                        Some(per_block) => per_block.get(i).unwrap_or(1),
                        None => 1,
                    };
                    Some(layers)
                } else {
                    None
                };
                Ok(BlockConfig {
                    out_channels,
                    use_cross_attn,
                    attention_head_dim,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(UNet2DConditionModelConfig {
            center_input_sample: self.center_input_sample,
            flip_sin_to_cos: self.flip_sin_to_cos,
            freq_shift: self.freq_shift,
            blocks,
            layers_per_block: self.layers_per_block,
            downsample_padding: self.downsample_padding,
            mid_block_scale_factor: self.mid_block_scale_factor,
            norm_num_groups: self.norm_num_groups,
            norm_eps: self.norm_eps,
            cross_attention_dim: self.cross_attention_dim,
            sliced_attention_size,
            use_linear_projection: self.use_linear_projection,
        })
    }
}
