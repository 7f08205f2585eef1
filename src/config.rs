//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::dispatch::DEFAULT_NUM_SHARDS;

/// The configuration for the sync storage server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Optionally set a custom bind address (will use 0.0.0.0 if unset).
    pub bind_addr: Option<IpAddr>,
    /// Port to bind to.
    pub port: u16,
    /// Root of the per-user database tree.
    pub data_dir: PathBuf,
    /// Number of worker lanes; all requests for one user run on one lane.
    pub num_shards: usize,
    /// Global budget of open user databases, split across the lanes.
    pub max_open_files: usize,
    /// Silent cap on the `limit` of collection listings.
    pub max_bso_get_limit: usize,
    /// Optional address to expose Prometheus metrics on.
    pub metrics_addr: Option<SocketAddr>,
    /// Optional period, in seconds, for sweeping expired records out of
    /// open stores. Expiry is enforced on reads either way.
    pub purge_interval_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: None,
            port: 8000,
            data_dir: PathBuf::from("./data"),
            num_shards: DEFAULT_NUM_SHARDS,
            max_open_files: 128,
            max_bso_get_limit: 2500,
            metrics_addr: None,
            purge_interval_secs: None,
        }
    }
}

impl Config {
    /// Reads a TOML config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// The socket address to serve on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.bind_addr.unwrap_or(Ipv4Addr::UNSPECIFIED.into()),
            self.port,
        )
    }

    /// Rejects configurations the storage layer cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            bail!("num_shards must be at least 1");
        }
        if self.max_open_files < self.num_shards {
            bail!(
                "max_open_files ({}) must allow at least one open store per shard ({})",
                self.max_open_files,
                self.num_shards,
            );
        }
        Ok(())
    }
}
