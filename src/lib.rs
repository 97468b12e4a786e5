//! Rendezvous Exchange Server
//!
//! A short-lived directory that lets peers find each other. A peer registers
//! an ephemeral code together with its overlay (virtual) and public
//! addresses; another peer that learned the code out-of-band looks it up to
//! bootstrap a direct connection. No tunnel traffic passes through here.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      REST API (axum)                          │
//! │   POST /register   GET /lookup   GET /stats   GET /           │
//! └───────────────┬───────────────────────────────┬───────────────┘
//!                 │ put / get                     │ size
//!         ┌───────┴───────────────────────────────┴───────┐
//!         │          Code Registry (RwLock<HashMap>)      │
//!         └───────┬───────────────────────────────┬───────┘
//!                 │ evict_expired                 │ stats
//!         ┌───────┴────────┐              ┌───────┴────────┐
//!         │ Expiry Sweeper │              │   Prometheus   │
//!         │  (every 5 min) │              │   /metrics     │
//!         └────────────────┘              └────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: code registry and expiry sweeper
//! - [`api`]: HTTP server and request handlers
//! - [`metrics`]: Prometheus exposition
//! - [`error`]: Error types and handling

pub mod api;
pub mod error;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use api::{ApiError, ApiServer, ApiServerConfig, RestRouter, DEFAULT_PORT};

pub use error::{Error, Result};

pub use metrics::{run_metrics_server, ExchangeMetrics};

pub use registry::{
    Code, CodeRegistry, Entry, ExpirySweeper, RegistryConfig, RegistryStatsSnapshot,
    DEFAULT_CODE_TTL, DEFAULT_SWEEP_INTERVAL,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
