use anyhow::Result;
use onestep_core::Config;

pub async fn execute(key: Option<&str>, value: Option<&str>) -> Result<()> {
    let mut config = Config::load()?;

    match (key, value) {
        // Show all config
        (None, _) => {
            println!("Configuration file: {:?}\n", Config::config_path()?);
            for (section, keys) in SECTIONS {
                println!("[{}]", section);
                for key in *keys {
                    let full = format!("{}.{}", section, key);
                    println!("  {} = {}", key, config.get(&full)?);
                }
                println!();
            }
        }

        // Get a specific key
        (Some(key), None) => {
            println!("{}", config.get(key)?);
        }

        // Set a specific key
        (Some(key), Some(value)) => {
            config.set(key, value)?;
            config.save()?;
            println!("Set {} = {}", key, config.get(key)?);
        }
    }

    Ok(())
}

const SECTIONS: &[(&str, &[&str])] = &[
    ("models", &["storage_path", "completeness"]),
    ("hub", &["endpoint", "token", "show_progress"]),
    (
        "inference",
        &[
            "use_gpu",
            "steps",
            "guidance_scale",
            "width",
            "height",
            "attention_slice_size",
        ],
    ),
    ("loader", &["mode", "graft_base"]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_key_is_readable() {
        let config = Config::default();
        for (section, keys) in SECTIONS {
            for key in *keys {
                let full = format!("{}.{}", section, key);
                assert!(config.get(&full).is_ok(), "{full}");
            }
        }
    }
}
