//! onestep_runtime_api - Runtime API traits and types
//!
//! This crate defines the contract between the pipeline loader and the
//! inference backends: the pipeline trait, request/response types, load
//! status and the scheduler description backends translate into their own
//! sampler implementations.

pub mod scheduler;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use scheduler::{
    BetaSchedule, PredictionType, SchedulerError, SchedulerKind, SchedulerSettings, SchedulerSpec,
    TimestepSpacing,
};

/// Loader status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    Unloaded,
    Loading,
    Loaded,
}

/// Floating point precision of the loaded weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    F16,
    F32,
}

impl Precision {
    /// Half precision on accelerators, full precision on the CPU.
    pub fn for_device(accelerated: bool) -> Self {
        if accelerated {
            Precision::F16
        } else {
            Precision::F32
        }
    }
}

/// Image generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// Values <= 1.0 disable classifier-free guidance
    #[serde(default)]
    pub guidance_scale: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_size() -> u32 {
    512
}

fn default_steps() -> u32 {
    1
}

/// Latent space is 8x smaller than pixel space.
pub const SPATIAL_ALIGN: u32 = 8;

impl Default for ImageGenRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: None,
            width: default_size(),
            height: default_size(),
            steps: default_steps(),
            guidance_scale: 0.0,
            seed: None,
        }
    }
}

impl ImageGenRequest {
    pub fn uses_guidance(&self) -> bool {
        self.guidance_scale > 1.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            anyhow::bail!("At least one inference step is required");
        }
        if self.width == 0
            || self.height == 0
            || self.width % SPATIAL_ALIGN != 0
            || self.height % SPATIAL_ALIGN != 0
        {
            anyhow::bail!(
                "Image dimensions must be positive multiples of {}. Got {}x{}",
                SPATIAL_ALIGN,
                self.width,
                self.height
            );
        }
        Ok(())
    }
}

/// Image generation response
#[derive(Debug, Clone)]
pub struct ImageGenResponse {
    /// Raw pixel data (RGB, u8, row-major)
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An inference-ready pipeline produced by a backend
pub trait DiffusionPipeline: Send + Sync {
    /// Human readable model name
    fn name(&self) -> &str;

    /// The sampler currently used by `generate`
    fn scheduler(&self) -> &SchedulerSpec;

    /// Replace the sampler
    fn set_scheduler(&mut self, spec: SchedulerSpec) -> Result<()>;

    /// Trade speed for lower peak memory in attention layers. Backends that
    /// fix slicing at construction only accept the size they were built with.
    fn enable_attention_slicing(&mut self, slice_size: usize) -> Result<()>;

    /// Generate an image from a text prompt
    fn generate(&self, request: &ImageGenRequest) -> Result<ImageGenResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_single_step_sampling() {
        let request: ImageGenRequest = serde_json::from_str(r#"{"prompt": "a lighthouse"}"#).unwrap();
        assert_eq!(request.steps, 1);
        assert_eq!((request.width, request.height), (512, 512));
        assert!(!request.uses_guidance());
        request.validate().unwrap();
    }

    #[test]
    fn misaligned_or_empty_requests_are_rejected() {
        let odd = ImageGenRequest {
            width: 500,
            ..Default::default()
        };
        assert!(odd.validate().is_err());

        let no_steps = ImageGenRequest {
            steps: 0,
            ..Default::default()
        };
        assert!(no_steps.validate().is_err());
    }

    #[test]
    fn precision_follows_the_device() {
        assert_eq!(Precision::for_device(true), Precision::F16);
        assert_eq!(Precision::for_device(false), Precision::F32);
    }
}
