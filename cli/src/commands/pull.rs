use anyhow::Result;
use onestep_core::{Config, RepositoryFetcher};

pub async fn execute(model: &str) -> Result<()> {
    let config = Config::load()?;
    let fetcher = RepositoryFetcher::from_config(&config)?;

    let repo_id = fetcher.resolve(model)?;
    println!("Pulling model: {}", repo_id);

    let path = fetcher.ensure_downloaded(&repo_id).await?;

    println!("\nModel ready!");
    println!("  Repo: {}", repo_id);
    println!("  Path: {}", path.display());

    Ok(())
}
