//! Subcommands and the helpers they share.

pub mod config;
pub mod extract;
pub mod rules;
pub mod run;

use std::path::{Path, PathBuf};

use adex_core::AdexConfig;
use tracing::debug;

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adex")
        .join("config.json")
}

/// Load the config from `path`, else the default location, else defaults.
pub fn load_config(path: Option<&str>) -> anyhow::Result<AdexConfig> {
    let config = match path {
        Some(path) => AdexConfig::from_file(Path::new(path))?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                debug!("Using config at {}", default_path.display());
                AdexConfig::from_file(&default_path)?
            } else {
                AdexConfig::default()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

/// Rule store location: the flag, else the configured one.
pub fn store_path(flag: Option<PathBuf>, config: &AdexConfig) -> anyhow::Result<PathBuf> {
    flag.or_else(|| config.cache.path.clone()).ok_or_else(|| {
        anyhow::anyhow!("No rule store configured. Pass --rules or set cache.path in the config.")
    })
}
