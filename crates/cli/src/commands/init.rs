//! `ralph-arena init`: Write the default config file.

use std::path::Path;

use arena_config::AppConfig;

pub fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    if write_default_config(&config_path, force)? {
        println!("Created config at: {}", config_path.display());
        println!("\nNext steps:");
        println!("   1. Set api_key in the file, or export ANTHROPIC_API_KEY");
        println!("   2. Run: ralph-arena serve");
    } else {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.");
    }

    Ok(())
}

/// Returns `false` when the file exists and `force` is off.
fn write_default_config(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_loadable_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default_config(&path, false).unwrap());
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.rate_limit.requests_per_hour, 10);
    }

    #[test]
    fn keeps_existing_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_model = \"custom\"\n").unwrap();

        assert!(!write_default_config(&path, false).unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("custom"));

        assert!(write_default_config(&path, true).unwrap());
        assert!(!std::fs::read_to_string(&path).unwrap().contains("custom"));
    }
}
