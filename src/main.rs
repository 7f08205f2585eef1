use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use syncstorage_server::{config::Config, server::run_with_config_until_ctrl_c};
use tracing::info;

/// A Firefox Sync 1.5 storage server with per-user SQLite stores.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,
    /// Override the configured bind address
    #[arg(short, long)]
    bind_addr: Option<IpAddr>,
    /// Override the root directory of the per-user database tree
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file (or the defaults) and applies the command
    /// line overrides on top.
    async fn into_config(self) -> Result<Config> {
        let mut config = match self.config {
            Some(path) => Config::load(path).await?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = Some(bind_addr);
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Cli::parse().into_config().await?;
    info!(
        addr = %config.listen_addr(),
        data_dir = %config.data_dir.display(),
        num_shards = config.num_shards,
        max_open_files = config.max_open_files,
        "starting sync storage server"
    );
    run_with_config_until_ctrl_c(config).await
}
