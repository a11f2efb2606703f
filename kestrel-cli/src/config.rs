//! Configuration management

use crate::format::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Presentation settings layered over the project manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default output format of `check`
    #[serde(default)]
    pub format: OutputFormat,

    /// Colour terminal output
    #[serde(default = "default_true")]
    pub color: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            color: default_true(),
        }
    }
}

impl CliConfig {
    /// Load configuration from file
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path.to_owned(),
            None => Self::default_config_path(),
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from(".kestrel-cli.toml")
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_load_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        fs::write(&path, "format = \"json\"\ncolor = false\n").unwrap();
        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert!(!config.color);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        fs::write(&path, "format = ").unwrap();
        let error = CliConfig::load(Some(&path)).unwrap_err();
        assert!(error.to_string().contains("cli.toml"));
    }
}
