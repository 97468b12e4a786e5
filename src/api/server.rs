//! API Server
//!
//! Binds the HTTP listener and serves the REST router until shutdown.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::RestRouter;
use crate::registry::{CodeRegistry, RegistryConfig};

/// Default listening port
pub const DEFAULT_PORT: u16 = 3000;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Max request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            request_timeout_secs: 30,
            max_body_size: 64 * 1024,
        }
    }
}

impl ApiServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// API Server
// =============================================================================

/// HTTP front end for the code registry
pub struct ApiServer {
    config: ApiServerConfig,
    registry_config: RegistryConfig,
    registry: Arc<CodeRegistry>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        registry_config: RegistryConfig,
        registry: Arc<CodeRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry_config,
            registry,
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })
    }

    /// Bind and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = RestRouter::new(self.registry.clone(), self.registry_config.clone())
            .with_request_timeout(Duration::from_secs(self.config.request_timeout_secs))
            .with_max_body_size(self.config.max_body_size)
            .with_start_time(self.started_at)
            .build();

        let local_addr = listener.local_addr()?;
        info!("REST API listening on {}", local_addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Server(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
