//! CLI configuration loaded from TOML.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use peerbeacon_types::Options;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub discovery: Options,
}

/// Logging settings. `RUST_LOG` takes precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file at the default location yields defaults; a missing file
/// that was asked for explicitly is an error. Returns the path actually
/// read, if any.
pub fn load_config(path: Option<&str>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let config_path = match path {
        Some(p) => {
            let p = PathBuf::from(p);
            if !p.exists() {
                bail!("config file {} does not exist", p.display());
            }
            p
        }
        None => default_config_path(),
    };

    if config_path.exists() {
        let config = read_config(&config_path)?;
        Ok((config, Some(config_path)))
    } else {
        Ok((Config::default(), None))
    }
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("peerbeacon")
}

fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
