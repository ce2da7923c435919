//! `nvlp config` — Configuration commands.

use std::path::Path;

use nvlp_config::AppConfig;

use super::load_config;

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn default() {
    println!("{}", AppConfig::default_toml());
}

pub fn path(config_path: Option<&Path>) {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    println!("{}", path.display());
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = nvlp_config::AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_toml_round_trips() {
        let text = nvlp_config::AppConfig::default_toml();
        let parsed: nvlp_config::AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.dispatch.sink, "log");
        assert_eq!(parsed.selection.conflicts.len(), 2);
    }
}
