//! `moldeo config` — Configuration management commands.

use std::path::Path;

use moldeo_config::EngineConfig;

pub fn show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        EngineConfig::load_with_env(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", EngineConfig::default_toml());
    Ok(())
}

pub fn path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", path.display());
    Ok(())
}

pub fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {}", path.display());
    if !path.exists() {
        println!("  No config file, defaults apply");
    }

    match EngineConfig::load_with_env(path) {
        Ok(config) => {
            println!("  Config is valid");
            println!();
            println!("  Separator:     {:?}", config.separator);
            println!("  Error policy:  {:?}", config.error_policy);
            println!("  Unknown keys:  {:?}", config.unknown_keys);
            println!("  Max depth:     {}", config.max_depth);
            println!(
                "  Fetch:         {} (timeout {}s)",
                config.fetch.base_url.as_deref().unwrap_or("no base url"),
                config.fetch.timeout_secs
            );
            Ok(())
        }
        Err(e) => {
            println!("  Config error: {e}");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_toml_round_trips_through_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, EngineConfig::default_toml()).unwrap();
        assert!(validate(&path).is_ok());
    }

    #[test]
    fn invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_depth = 0\n").unwrap();
        assert!(validate(&path).is_err());
    }
}
