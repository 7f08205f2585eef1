//! The main server: storage dispatch plus the HTTP front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use iroh_metrics::service::start_metrics_server;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::http::HttpServer;
use crate::metrics::Metrics;
use crate::state::AppState;
use crate::storage::Dispatch;

/// Spawn the server and run until the `Ctrl-C` signal is received, then
/// shutdown.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let metrics = Arc::new(Metrics::default());
    let server = Server::spawn(config, metrics).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    server.shutdown().await?;
    Ok(())
}

/// The sync storage server.
pub struct Server {
    http_server: HttpServer,
    dispatch: Arc<Dispatch>,
    _metrics_task: AbortOnDropHandle<()>,
    _purge_task: Option<AbortOnDropHandle<()>>,
}

impl Server {
    /// Spawn the server.
    ///
    /// This will spawn the storage shards, the HTTP server task, an
    /// optional metrics endpoint and an optional TTL purge sweep.
    pub async fn spawn(config: Config, metrics: Arc<Metrics>) -> Result<Self> {
        let dispatch = Arc::new(Dispatch::new(
            &config.data_dir,
            config.num_shards,
            config.max_open_files,
            metrics.clone(),
        )?);
        let state = AppState {
            dispatch: dispatch.clone(),
            metrics: metrics.clone(),
            max_bso_get_limit: config.max_bso_get_limit,
        };

        let metrics_addr = config.metrics_addr;
        let metrics_task = AbortOnDropHandle::new(tokio::task::spawn(async move {
            if let Some(addr) = metrics_addr {
                let mut registry = iroh_metrics::Registry::default();
                registry.register(metrics);
                if let Err(err) = start_metrics_server(addr, Arc::new(registry)).await {
                    error!("metrics server failed: {err:#}");
                }
            }
        }));

        let purge_task = config.purge_interval_secs.map(|secs| {
            let dispatch = dispatch.clone();
            AbortOnDropHandle::new(tokio::task::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match dispatch.purge_resident().await {
                        Ok(purged) if purged > 0 => info!(purged, "purged expired records"),
                        Ok(_) => {}
                        Err(err) => {
                            error!("purge sweep failed: {err}");
                            break;
                        }
                    }
                }
            }))
        });

        let http_server = HttpServer::spawn(config.listen_addr(), state).await?;
        Ok(Self {
            http_server,
            dispatch,
            _metrics_task: metrics_task,
            _purge_task: purge_task,
        })
    }

    /// The bound address of the HTTP socket.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        Some(self.http_server.addr())
    }

    /// The storage façade, for embedding and tests.
    pub fn dispatch(&self) -> &Arc<Dispatch> {
        &self.dispatch
    }

    /// Cancel the server tasks, drain the shards and wait for all of it
    /// to complete.
    pub async fn shutdown(self) -> Result<()> {
        let res = self.http_server.shutdown().await;
        self.dispatch.shutdown().await;
        res
    }

    /// Wait for the HTTP task to complete.
    ///
    /// This will run forever unless the task closes with an error.
    pub async fn run_until_done(self) -> Result<()> {
        self.http_server.run_until_done().await
    }

    /// A config bound to the loopback interface on a free port, storing
    /// under `dir`.
    #[cfg(test)]
    pub(crate) fn test_config(dir: &std::path::Path) -> Config {
        Config {
            bind_addr: Some(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
            port: 0,
            data_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    /// Spawn a server suitable for testing.
    #[cfg(test)]
    pub(crate) async fn spawn_for_tests(dir: &std::path::Path) -> Self {
        Self::spawn_for_tests_with_config(Self::test_config(dir)).await
    }

    /// Spawn a server suitable for testing with a customized config.
    #[cfg(test)]
    pub(crate) async fn spawn_for_tests_with_config(config: Config) -> Self {
        Self::spawn(config, Arc::new(Metrics::default()))
            .await
            .expect("failed to spawn test server")
    }
}
