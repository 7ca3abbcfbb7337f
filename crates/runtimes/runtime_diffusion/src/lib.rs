//! onestep_runtime_diffusion - Pipeline loading and diffusion inference
//!
//! This crate turns a downloaded checkpoint into a runnable pipeline:
//! ordered loading strategies, fast scheduler substitution and device
//! placement live in [`ModelLoader`]; [`CandleBackend`] builds Stable
//! Diffusion 1.x/2.x pipelines with candle.

mod backend;
mod device;
mod files;
mod loader;
mod sampler;
mod stable_diffusion;
mod strategy;
mod unet_config;

use anyhow::Result;
use onestep_runtime_api::{DiffusionPipeline, Precision};

pub use backend::CandleBackend;
pub use device::{device_label, select_device};
pub use loader::{LoadReport, LoadWarning, LoaderOptions, ModelLoader};
pub use stable_diffusion::StableDiffusionPipeline;
pub use strategy::LoadStrategy;

/// Builds pipelines for one compute device.
pub trait PipelineBackend: Send + Sync + 'static {
    type Pipeline: DiffusionPipeline + 'static;

    /// Whether the device is a GPU (CUDA or Metal)
    fn is_accelerated(&self) -> bool;

    fn device_label(&self) -> String;

    /// Construct a pipeline with one strategy. Blocking. `attention_slice` is
    /// the slice size the loader will ask for, so backends that fix it at
    /// construction can build the sliced network once.
    fn build(
        &self,
        strategy: &LoadStrategy,
        precision: Precision,
        attention_slice: Option<usize>,
    ) -> Result<Self::Pipeline>;
}
