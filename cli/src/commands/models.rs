use anyhow::Result;
use onestep_core::{Config, RepositoryFetcher};

pub async fn execute() -> Result<()> {
    let config = Config::load()?;
    let fetcher = RepositoryFetcher::from_config(&config)?;
    let models = fetcher.local_models()?;

    if models.is_empty() {
        println!("No models downloaded to {}.", fetcher.models_dir().display());
        println!("\nRun `onestep pull <model>` to download a model.");
        return Ok(());
    }

    println!("{:<45} {:<10} {}", "MODEL", "SIZE", "DOWNLOADED");
    println!("{}", "-".repeat(80));

    for model in models {
        match &model.manifest {
            Some(manifest) => {
                let size = format!("{:.2} GB", manifest.total_bytes() as f64 / 1_073_741_824.0);
                let date = manifest.downloaded_at.format("%Y-%m-%d").to_string();
                println!("{:<45} {:<10} {}", manifest.repo_id.to_string(), size, date);
            }
            None => println!("{:<45} {:<10} {}", model.dir_name, "-", "incomplete"),
        }
    }

    Ok(())
}
