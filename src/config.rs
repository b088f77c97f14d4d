//! Dev only

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use serde::Deserialize;
use crate::upload::constants::DEFAULT_FRAGMENT_TIMEOUT;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Parent folder url, e.g. `https://graph.microsoft.com/v1.0/me/drive/root:/Uploads`
    pub item_url: String,
    pub file_path: PathBuf,
    /// Defaults to the local file name
    pub file_name: Option<String>,
    pub token: String,
    #[serde(default)]
    pub use_commit: bool,
    pub fragment_timeout_secs: Option<u64>,
}

impl Config {
    pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&config_str)
            .with_context(|| format!("Can't load {}", path.display()))
    }

    pub fn parse(config_str: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn fragment_timeout(&self) -> Duration {
        self.fragment_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FRAGMENT_TIMEOUT)
    }

    pub fn file_name(&self) -> anyhow::Result<String> {
        if let Some(name) = &self.file_name {
            return Ok(name.clone());
        }

        self.file_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .with_context(|| format!("Can't read file name of {}", self.file_path.display()))
    }
}
