//! Rendezvous Exchange Server
//!
//! Peers register a short code with their virtual and public addresses;
//! other peers look the code up to open a direct connection.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use rendezvous_exchange::{
    run_metrics_server, ApiServer, ApiServerConfig, CodeRegistry, Error, ExchangeMetrics,
    ExpirySweeper, RegistryConfig, Result, DEFAULT_PORT,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Rendezvous Exchange Server - short-lived peer code directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the REST API
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Interface to bind the REST API on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Seconds a registered code stays valid
    #[arg(long, env = "CODE_TTL_SECS", default_value = "1800")]
    ttl_secs: u64,

    /// Seconds between expiry sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "300")]
    sweep_interval_secs: u64,

    /// Hide expired codes on lookup instead of waiting for the next sweep
    #[arg(long, env = "STRICT_FRESHNESS")]
    strict_freshness: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Metrics server bind address (disabled when unset)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            strict_freshness: self.strict_freshness,
        }
    }

    fn api_config(&self) -> Result<ApiServerConfig> {
        let host: IpAddr = self.host.parse().map_err(|e| {
            Error::Configuration(format!("Invalid host {}: {}", self.host, e))
        })?;

        Ok(ApiServerConfig {
            bind_addr: SocketAddr::new(host, self.port),
            request_timeout_secs: self.request_timeout_secs,
            ..Default::default()
        })
    }

    fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        self.metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|e| {
                    Error::Configuration(format!("Invalid metrics address {}: {}", addr, e))
                })
            })
            .transpose()
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let registry_config = args.registry_config();
    registry_config.validate()?;
    let api_config = args.api_config()?;
    api_config.validate()?;
    let metrics_addr = args.metrics_addr()?;

    info!("Starting Rendezvous Exchange Server");
    info!("  Version: {}", rendezvous_exchange::VERSION);
    info!("  REST API: {}", api_config.bind_addr);
    info!("  Code TTL: {:?}", registry_config.ttl);
    info!("  Sweep interval: {:?}", registry_config.sweep_interval);
    info!("  Strict freshness: {}", registry_config.strict_freshness);

    let registry = CodeRegistry::new();
    let shutdown = CancellationToken::new();

    let sweeper = ExpirySweeper::new(registry.clone(), &registry_config).spawn(shutdown.clone());

    if let Some(addr) = metrics_addr {
        let metrics = ExchangeMetrics::new(registry.clone())?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, token).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            token.cancel();
        });
    }

    let api_server = ApiServer::new(api_config, registry_config, registry, shutdown.clone());
    let result = api_server.run().await;

    // Stop background tasks even if the server failed to start.
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Expiry sweeper ended abnormally: {}", e);
    }

    result?;
    info!("Server shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(level, rust_log.as_deref());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// An explicit `RUST_LOG` is used as-is; otherwise `level` applies with the
/// connection-level crates pinned to warn.
fn log_filter(level: Level, rust_log: Option<&str>) -> EnvFilter {
    if let Some(rust_log) = rust_log.filter(|s| !s.trim().is_empty()) {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new("").add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

// =============================================================================
// Shutdown Signal
// =============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
