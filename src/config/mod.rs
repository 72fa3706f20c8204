use serde::Deserialize;
use std::path::PathBuf;
use std::{fs, path::Path};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub directory: String,
    pub journal_file: String,
    /// Fsync the journal before acknowledging each append. Turning this off
    /// trades crash durability for write throughput.
    pub sync_on_write: bool,
    /// Minimum number of tombstone records before the journal is rewritten.
    pub compact_min_tombstones: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: "./hitqueue-data".to_string(),
            journal_file: "hits.journal".to_string(),
            sync_on_write: true,
            compact_min_tombstones: 64,
        }
    }
}

impl StoreConfig {
    pub fn journal_path(&self) -> PathBuf {
        PathBuf::from(&self.directory).join(&self.journal_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub retry: RetryConfig,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}
