mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::generate::{GenerateArgs, DEFAULT_OUTPUT};

#[derive(Parser)]
#[command(name = "onestep")]
#[command(author, version, about = "Fetch diffusion checkpoints and generate images in one step", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull a model snapshot from HuggingFace
    Pull {
        /// Model reference (e.g., "IDKiro/sdxs-512-0.9" or a huggingface.co URL)
        model: String,
    },

    /// List downloaded models
    #[command(alias = "ls")]
    Models,

    /// Remove a downloaded model
    #[command(alias = "rm")]
    Remove {
        /// Model reference to remove
        model: String,
    },

    /// View or set configuration
    Config {
        /// Config key (e.g., "models.storage_path", "inference.steps")
        key: Option<String>,

        /// Value to set (if omitted, shows current value)
        value: Option<String>,
    },

    /// Generate an image from a text prompt
    Generate {
        /// Text prompt for image generation
        prompt: String,

        /// Model reference (e.g., "IDKiro/sdxs-512-0.9" or a huggingface.co URL)
        #[arg(short, long, default_value = "IDKiro/sdxs-512-0.9")]
        model: String,

        /// Output file path
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: String,

        /// Image width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Image height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Number of inference steps
        #[arg(short, long)]
        steps: Option<u32>,

        /// Guidance scale for CFG
        #[arg(short, long)]
        guidance_scale: Option<f32>,

        /// Negative prompt (for CFG)
        #[arg(long)]
        negative_prompt: Option<String>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Run on CPU instead of GPU
        #[arg(long)]
        cpu: bool,

        /// Load only the UNet from the model and graft it onto the base pipeline
        #[arg(long)]
        graft: bool,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pull { model } => {
            commands::pull::execute(&model).await?;
        }
        Commands::Models => {
            commands::models::execute().await?;
        }
        Commands::Remove { model } => {
            commands::remove::execute(&model).await?;
        }
        Commands::Config { key, value } => {
            commands::config::execute(key.as_deref(), value.as_deref()).await?;
        }
        Commands::Generate {
            prompt,
            model,
            output,
            width,
            height,
            steps,
            guidance_scale,
            negative_prompt,
            seed,
            cpu,
            graft,
        } => {
            commands::generate::execute(GenerateArgs {
                model,
                prompt,
                output,
                width,
                height,
                steps,
                guidance_scale,
                negative_prompt,
                seed,
                cpu,
                graft,
            })
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_leaves_unset_options_to_config() {
        let cli = Cli::parse_from(["onestep", "generate", "a cat", "--graft"]);
        match cli.command {
            Commands::Generate { model, steps, width, graft, .. } => {
                assert_eq!(model, "IDKiro/sdxs-512-0.9");
                assert_eq!(steps, None);
                assert_eq!(width, None);
                assert!(graft);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn ls_alias_maps_to_models() {
        let cli = Cli::parse_from(["onestep", "ls"]);
        assert!(matches!(cli.command, Commands::Models));
    }
}
