use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

/// Which kind of store backs the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// The in-process store. Fast and dependency-free, but per-process.
    #[default]
    InMemory,
    /// A remote store reached through a [`Connect`](crate::persistor::connection::Connect)
    /// implementation supplied by the embedding application.
    Remote,
}

/// Retry behavior while establishing a store connection.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How many connect attempts before the connection is declared failed.
    pub max_attempts: u32,

    /// Base delay between attempts. The actual delay grows linearly with the
    /// attempt number, so attempt 2 waits `2 * backoff` and so on.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Controls the log level of the tracing subscriber.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The maximum level to emit, e.g. `debug` or `warn`.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

/// The cache's configuration, usually loaded from a YAML file.
///
/// Every field has a default, so an empty document is a valid configuration
/// running entirely in memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which store backs the cache.
    pub mode: StorageMode,

    /// The named connection to use. `None` selects the default connection.
    pub connection_name: Option<String>,

    /// Prefix prepended (with a `:` separator) to every cache key.
    pub prefix: Option<String>,

    /// Retry behavior for establishing connections.
    pub connection: ConnectionConfig,

    /// TTL applied when a call site's expiry hook cannot produce one.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    pub logging: Logging,
}

impl Config {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse configuration")
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open configuration file {}", path.display()))?;
        Self::from_reader(file)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            connection_name: None,
            prefix: None,
            connection: ConnectionConfig::default(),
            default_ttl: crate::expiry::DEFAULT_TTL,
            logging: Logging::default(),
        }
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
