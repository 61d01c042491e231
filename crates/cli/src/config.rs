//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Default output format
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from the user's config file
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`; a missing file is an empty config
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("fleetctl").join("config.json"))
    }

    /// The flag or env value wins over the file, then the local default
    pub fn resolve_api_url(&self, explicit: Option<String>) -> String {
        explicit
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.api_url.is_none());
        assert_eq!(config.resolve_api_url(None), DEFAULT_API_URL);
    }

    #[test]
    fn test_resolution_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_url": "http://controller:8080"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.resolve_api_url(None), "http://controller:8080");
        assert_eq!(
            config.resolve_api_url(Some("http://other:9090".to_string())),
            "http://other:9090"
        );
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
