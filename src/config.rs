//! TOML configuration for the loader.
//!
//! Every run parameter (store URL, collection name, source path, batching and
//! retry knobs) lives in one [`Config`] that is passed explicitly into each
//! pipeline stage. See `config/bars.example.toml` for a complete file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Basic-auth user. The password is read from `BARS_STORE_PASSWORD`.
    #[serde(default)]
    pub username: Option<String>,
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl SourceConfig {
    /// The delimiter as the single byte the CSV reader expects.
    ///
    /// Only meaningful after [`load_config`] validation.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

fn default_delimiter() -> String {
    ",".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_workers() -> usize {
    4
}
fn default_channel_capacity() -> usize {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Check every bound the pipeline relies on.
    ///
    /// Also called after CLI overrides are applied, so a `--batch-size 0`
    /// is rejected the same way a bad config file is.
    pub fn validate(&self) -> Result<()> {
        // Validate store
        let url = self.store.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!(
                "store.url must start with http:// or https:// (got '{}')",
                self.store.url
            );
        }
        if self.store.max_retries == 0 {
            bail!("store.max_retries must be >= 1");
        }
        if self.store.timeout_secs == 0 {
            bail!("store.timeout_secs must be > 0");
        }

        validate_index_name(&self.index.name)?;

        // Validate source
        if self.source.delimiter.len() != 1 || !self.source.delimiter.is_ascii() {
            bail!(
                "source.delimiter must be a single ASCII character (got '{}')",
                self.source.delimiter
            );
        }

        // Validate load
        if self.load.batch_size == 0 {
            bail!("load.batch_size must be >= 1");
        }
        if self.load.workers == 0 {
            bail!("load.workers must be >= 1");
        }
        if self.load.channel_capacity == 0 {
            bail!("load.channel_capacity must be >= 1");
        }

        Ok(())
    }
}

/// Elasticsearch index naming rules.
pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("index.name must not be empty");
    }
    if name.starts_with(['-', '_', '+']) {
        bail!("index.name must not start with '-', '_' or '+' (got '{}')", name);
    }
    if name == "." || name == ".." {
        bail!("index.name must not be '.' or '..'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        bail!("index.name must be lowercase (got '{}')", name);
    }
    const FORBIDDEN: &[char] = &['/', '\\', '*', '?', '"', '<', '>', '|', ',', '#', ' ', ':'];
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        bail!("index.name contains forbidden character '{}' (got '{}')", c, name);
    }
    Ok(())
}
