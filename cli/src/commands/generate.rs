//! Image generation command

use anyhow::Result;
use chrono::Local;
use onestep_core::config::LoaderMode;
use onestep_core::{Config, RepositoryFetcher};
use onestep_runtime_api::{DiffusionPipeline, ImageGenRequest};
use onestep_runtime_diffusion::{select_device, CandleBackend, LoaderOptions, ModelLoader};
use std::path::{Path, PathBuf};

/// Default output name; replaced by a timestamped file name.
pub const DEFAULT_OUTPUT: &str = "output.png";

pub struct GenerateArgs {
    pub model: String,
    pub prompt: String,
    pub output: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub cpu: bool,
    pub graft: bool,
}

pub async fn execute(args: GenerateArgs) -> Result<()> {
    let config = Config::load()?;
    let fetcher = RepositoryFetcher::from_config(&config)?;

    let request = ImageGenRequest {
        prompt: args.prompt.clone(),
        negative_prompt: args.negative_prompt.clone(),
        width: args.width.unwrap_or(config.inference.width),
        height: args.height.unwrap_or(config.inference.height),
        steps: args.steps.unwrap_or(config.inference.steps),
        guidance_scale: args.guidance_scale.unwrap_or(config.inference.guidance_scale),
        seed: args.seed,
    };
    request.validate()?;

    let repo_id = fetcher.resolve(&args.model)?;

    println!("Image Generation");
    println!("================");
    println!("Model: {}", repo_id);
    println!("Prompt: {}", request.prompt);
    println!("Size: {}x{}", request.width, request.height);
    println!("Steps: {}", request.steps);
    println!("Guidance scale: {}", request.guidance_scale);
    if let Some(seed) = request.seed {
        println!("Seed: {}", seed);
    }
    println!();

    let model_path = fetcher.ensure_downloaded(&repo_id).await?;

    let device = select_device(config.inference.use_gpu && !args.cpu)?;
    let backend = CandleBackend::new(device, &config.hub)?;

    let mut options = LoaderOptions::from_config(&config);
    if args.graft {
        options.mode = LoaderMode::Graft;
    }

    println!("Loading model...");
    let mut loader = ModelLoader::new(backend, options);
    let report = loader.load(&repo_id, &model_path).await?;

    for fallback in &report.fallbacks {
        println!("Skipped {}", fallback);
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    println!(
        "Model loaded via {} on {} ({:?}, {:?} scheduler)",
        report.strategy, report.device, report.precision, report.scheduler.kind
    );

    let pipeline = loader.pipeline()?;

    println!("\nGenerating image...");
    let start = std::time::Instant::now();
    let response = tokio::task::block_in_place(|| pipeline.generate(&request))?;
    println!("Generation completed in {:.2}s", start.elapsed().as_secs_f64());

    let output_path = resolve_output_path(&args.output)?;

    println!("\nSaving to: {}", output_path.display());
    save_image(&response.pixels, response.width, response.height, &output_path)?;

    println!("\nDone!");
    Ok(())
}

/// Resolve output path, defaulting to ~/Documents/onestep/
fn resolve_output_path(output: &str) -> Result<PathBuf> {
    let output_dir = dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("onestep");
    output_path_in(&output_dir, output)
}

fn output_path_in(output_dir: &Path, output: &str) -> Result<PathBuf> {
    let path = PathBuf::from(output);

    if path.is_absolute() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        return Ok(path);
    }

    std::fs::create_dir_all(output_dir)?;

    if output == DEFAULT_OUTPUT {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        Ok(output_dir.join(format!("image_{}.png", timestamp)))
    } else {
        Ok(output_dir.join(output))
    }
}

fn save_image(pixels: &[u8], width: u32, height: u32, path: &Path) -> Result<()> {
    let img = image::RgbImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| anyhow::anyhow!("Failed to create image from pixels"))?;

    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_gets_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("images");

        let path = output_path_in(&out, DEFAULT_OUTPUT).unwrap();

        assert!(out.is_dir());
        assert_eq!(path.parent().unwrap(), out);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("image_") && name.ends_with(".png"));
    }

    #[test]
    fn relative_output_lands_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = output_path_in(dir.path(), "cat.png").unwrap();
        assert_eq!(path, dir.path().join("cat.png"));
    }

    #[test]
    fn absolute_output_is_kept_and_parent_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("cat.png");

        let path = output_path_in(Path::new("/unused"), target.to_str().unwrap()).unwrap();

        assert_eq!(path, target);
        assert!(target.parent().unwrap().is_dir());
    }

    #[test]
    fn save_image_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_image(&[0u8; 5], 2, 2, &dir.path().join("x.png")).unwrap_err();
        assert!(err.to_string().contains("pixels"));
    }

    #[test]
    fn save_image_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.png");
        save_image(&[255u8; 12], 2, 2, &path).unwrap();
        assert!(path.exists());
    }
}
