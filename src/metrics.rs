//! Prometheus Metrics
//!
//! Registry counters are read from [`CodeRegistry::stats`] at scrape time, so
//! the request path never touches Prometheus types. Metrics live in a
//! dedicated `prometheus::Registry` and are served on their own listener.

use crate::error::{Error, Result};
use crate::registry::CodeRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const NAMESPACE: &str = "rendezvous";

// =============================================================================
// Registry Collector
// =============================================================================

/// Mirrors [`CodeRegistry`] statistics into Prometheus metrics on each scrape
struct RegistryCollector {
    registry: Arc<CodeRegistry>,
    registrations: IntCounter,
    overwrites: IntCounter,
    lookups: IntCounterVec,
    evictions: IntCounter,
    sweeps: IntCounter,
    active_codes: IntGauge,
    // Serializes reset-and-fill so concurrent scrapes never double count.
    scrape: Mutex<()>,
}

impl RegistryCollector {
    fn new(registry: Arc<CodeRegistry>) -> Result<Self> {
        Ok(Self {
            registry,
            registrations: IntCounter::with_opts(
                Opts::new("registrations_total", "Codes registered, including overwrites")
                    .namespace(NAMESPACE),
            )?,
            overwrites: IntCounter::with_opts(
                Opts::new("overwrites_total", "Registrations that replaced an existing code")
                    .namespace(NAMESPACE),
            )?,
            lookups: IntCounterVec::new(
                Opts::new("lookups_total", "Code lookups by outcome").namespace(NAMESPACE),
                &["outcome"],
            )?,
            evictions: IntCounter::with_opts(
                Opts::new("evictions_total", "Codes removed by expiry sweeps")
                    .namespace(NAMESPACE),
            )?,
            sweeps: IntCounter::with_opts(
                Opts::new("sweeps_total", "Expiry sweeps performed").namespace(NAMESPACE),
            )?,
            active_codes: IntGauge::with_opts(
                Opts::new("active_codes", "Codes currently registered").namespace(NAMESPACE),
            )?,
            scrape: Mutex::new(()),
        })
    }

    fn counters(&self) -> [&IntCounter; 4] {
        [
            &self.registrations,
            &self.overwrites,
            &self.evictions,
            &self.sweeps,
        ]
    }
}

impl Collector for RegistryCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs: Vec<&Desc> = self
            .counters()
            .into_iter()
            .flat_map(|counter| counter.desc())
            .collect();
        descs.extend(self.lookups.desc());
        descs.extend(self.active_codes.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.scrape.lock();
        let stats = self.registry.stats();

        let values = [
            stats.registrations,
            stats.overwrites,
            stats.evictions,
            stats.sweeps,
        ];
        for (counter, value) in self.counters().into_iter().zip(values) {
            counter.reset();
            counter.inc_by(value);
        }

        let hits = self.lookups.with_label_values(&["hit"]);
        hits.reset();
        hits.inc_by(stats.lookup_hits);
        let misses = self.lookups.with_label_values(&["miss"]);
        misses.reset();
        misses.inc_by(stats.lookup_misses());

        self.active_codes.set(self.registry.size() as i64);

        let mut families: Vec<MetricFamily> = self
            .counters()
            .into_iter()
            .flat_map(|counter| counter.collect())
            .collect();
        families.extend(self.lookups.collect());
        families.extend(self.active_codes.collect());
        families
    }
}

// =============================================================================
// Exchange Metrics
// =============================================================================

/// Prometheus registry holding the server's metrics
pub struct ExchangeMetrics {
    registry: Registry,
}

impl ExchangeMetrics {
    /// Create metrics backed by `codes`
    pub fn new(codes: Arc<CodeRegistry>) -> Result<Arc<Self>> {
        let registry = Registry::new();
        registry.register(Box::new(RegistryCollector::new(codes)?))?;
        Ok(Arc::new(Self { registry }))
    }

    /// Encode all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Server(format!("metrics not UTF-8: {}", e)))
    }

    /// Router exposing `GET /metrics`
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self)
    }
}

async fn metrics_handler(State(metrics): State<Arc<ExchangeMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Serve metrics on `addr` until `shutdown` is cancelled
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<ExchangeMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;

    info!("Metrics server listening on {}", addr);

    axum::serve(listener, metrics.router())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Server(format!("Metrics server error: {}", e)))?;

    Ok(())
}
