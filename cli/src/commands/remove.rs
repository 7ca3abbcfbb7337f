use anyhow::Result;
use onestep_core::{Config, LocalModel, RepositoryFetcher};

pub async fn execute(model: &str) -> Result<()> {
    let config = Config::load()?;
    let fetcher = RepositoryFetcher::from_config(&config)?;

    // Partial names are not valid references; they only drive suggestions.
    let needle = match fetcher.resolve(model) {
        Ok(repo_id) => {
            if fetcher.remove(&repo_id)? {
                println!("Model '{}' removed.", repo_id);
                return Ok(());
            }
            repo_id.name().to_string()
        }
        Err(_) => model.trim().to_string(),
    };

    let matches = similar_models(fetcher.local_models()?, &needle);

    if matches.is_empty() {
        println!("Model '{}' not found.", model);
        println!("\nRun `onestep models` to see downloaded models.");
    } else {
        println!("Model '{}' not found. Similar models:", model);
        for m in matches {
            println!("  - {}", m.dir_name);
        }
    }

    Ok(())
}

fn similar_models(models: Vec<LocalModel>, needle: &str) -> Vec<LocalModel> {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    models
        .into_iter()
        .filter(|m| m.dir_name.to_lowercase().contains(&needle))
        .collect()
}
