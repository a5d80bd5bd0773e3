//! Capture Relay Server
//!
//! HTTP front end for [`relay_core::Relay`]: the capture API used by the
//! capturing client, the admin API, health and metrics endpoints.

use axum::Router;
use chrono::Utc;
use relay_core::{CollectionStore, JsonFileStore, MemoryStore, Relay, RelayConfig, ReqwestUpstream};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub mod admin;
pub mod capture;
pub mod cli;
pub mod error;
pub mod http;
pub mod logging;

pub use error::{ApiError, ServerError};
pub use http::{build_router, AppState};
pub use logging::{init_logging, LoggingConfig};

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory of the JSON collection files; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub body_limit_bytes: usize,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: Some(PathBuf::from("./db")),
            body_limit_bytes: 10 * 1024 * 1024,
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub struct RelayServer {
    config: ServerConfig,
    relay: Arc<Relay>,
}

impl RelayServer {
    /// Open the store and build the relay. Rules are loaded here, so a
    /// corrupt rule file fails startup.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn CollectionStore> = match &config.data_dir {
            Some(dir) => {
                info!(data_dir = %dir.display(), "Using JSON file store");
                Arc::new(JsonFileStore::open(dir).await?)
            }
            None => {
                warn!("Using in-memory store, captured data will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };
        let upstream = Arc::new(ReqwestUpstream::new(config.relay.upstream_timeout())?);
        let relay = Relay::new(config.relay.clone(), store, upstream).await?;

        Ok(Self {
            config,
            relay: Arc::new(relay),
        })
    }

    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    pub fn router(&self) -> Router {
        build_router(AppState::new(self.relay()), self.config.body_limit_bytes)
    }

    /// Bind `0.0.0.0:<port>` and serve until Ctrl-C.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let retention = spawn_retention_task(self.relay(), self.config.relay.retention_days);
        let app = self.router();

        info!("Capture relay listening on http://{}", listener.local_addr()?);
        let result = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;

        if let Some(task) = retention {
            task.abort();
        }
        result?;
        info!("Capture relay stopped");
        Ok(())
    }
}

/// Periodically drop captured records older than `retention_days`.
/// Zero disables the sweep.
pub fn spawn_retention_task(relay: Arc<Relay>, retention_days: u32) -> Option<JoinHandle<()>> {
    if retention_days == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
            if let Err(e) = relay.query().prune_older_than(cutoff).await {
                error!(error = %e, "Retention sweep failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
