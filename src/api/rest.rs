//! REST API Handlers
//!
//! Implements the code exchange endpoints: registration, lookup, stats and
//! the health banner. Every response carries permissive CORS headers and
//! any unmatched method/path is answered with a JSON 404.

use crate::registry::{CodeRegistry, Entry, RegistryConfig};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info};

/// Plain-text body of `GET /`
pub const HEALTH_BANNER: &str = "Rendezvous Exchange Server - Running";

const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Code registration request
///
/// Fields are optional at the parsing stage so that an absent field is
/// reported as missing rather than as malformed JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "virtualIP")]
    pub virtual_ip: Option<String>,
    #[serde(default, rename = "publicIP")]
    pub public_ip: Option<String>,
}

impl From<&Value> for RegisterRequest {
    /// Pick the string fields out of any JSON value. Non-objects and
    /// non-string fields yield `None` for the affected fields.
    fn from(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
        Self {
            code: field("code"),
            virtual_ip: field("virtualIP"),
            public_ip: field("publicIP"),
        }
    }
}

impl RegisterRequest {
    /// Split into `(code, virtual_ip, public_ip)` if all three are present
    /// and non-empty
    pub fn into_parts(self) -> Option<(String, String, String)> {
        fn required(field: Option<String>) -> Option<String> {
            field.filter(|value| !value.is_empty())
        }

        Some((
            required(self.code)?,
            required(self.virtual_ip)?,
            required(self.public_ip)?,
        ))
    }
}

/// Code registration acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub code: String,
}

/// Query parameters of `GET /lookup`, in request order
///
/// Kept as raw pairs so a repeated `code` resolves to its first value
/// instead of failing to deserialize.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct LookupParams(pub Vec<(String, String)>);

impl LookupParams {
    /// First value of `code`, if present and non-empty
    pub fn code(self) -> Option<String> {
        self.0
            .into_iter()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }
}

/// Addresses registered under a code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    #[serde(rename = "virtualIP")]
    pub virtual_ip: String,
    #[serde(rename = "publicIP")]
    pub public_ip: String,
}

impl From<Entry> for LookupResponse {
    fn from(entry: Entry) -> Self {
        Self {
            virtual_ip: entry.virtual_address,
            public_ip: entry.public_address,
        }
    }
}

/// Server statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Codes currently held by the registry
    pub active_codes: usize,
    /// Seconds since the server started
    pub uptime: f64,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
}

// =============================================================================
// API Errors
// =============================================================================

/// Request-level failures, each mapped to a fixed status and message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// Register body is not parsable JSON
    InvalidJson,
    /// Register body lacks `code`, `virtualIP` or `publicIP`
    MissingFields,
    /// Lookup without a `code` query parameter
    MissingCode,
    /// Register body exceeds the configured size limit
    PayloadTooLarge,
    /// Code was never registered or has been swept
    CodeNotFound,
    /// No route for this method and path
    NotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson | ApiError::MissingFields | ApiError::MissingCode => {
                StatusCode::BAD_REQUEST
            }
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::CodeNotFound | ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ApiError::InvalidJson => "Invalid JSON",
            ApiError::MissingFields => "Missing required fields",
            ApiError::MissingCode => "Missing code parameter",
            ApiError::PayloadTooLarge => "Payload too large",
            ApiError::CodeNotFound => "Code not found or expired",
            ApiError::NotFound => "Not found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ApiErrorResponse {
                error: self.message().into(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    registry: Arc<CodeRegistry>,
    registry_config: RegistryConfig,
    request_timeout: Duration,
    max_body_size: usize,
    started_at: Instant,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(registry: Arc<CodeRegistry>, registry_config: RegistryConfig) -> Self {
        Self {
            registry,
            registry_config,
            request_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024,
            started_at: Instant::now(),
        }
    }

    /// Abort requests that take longer than `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Reject request bodies larger than `bytes`
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Measure `/stats` uptime from `started_at` instead of router creation
    pub fn with_start_time(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            registry: self.registry,
            config: Arc::new(self.registry_config),
            started_at: self.started_at,
        };

        // Preflight answers come from the CORS layer; the set-header layers
        // add the method/header lists to ordinary responses as well.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .route("/", get(health_banner).head(not_found).fallback(not_found))
            .route("/register", post(register_code).fallback(not_found))
            .route("/lookup", get(lookup_code).head(not_found).fallback(not_found))
            .route("/stats", get(get_stats).head(not_found).fallback(not_found))
            .fallback(not_found)
            .with_state(state)
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
            .layer(SetResponseHeaderLayer::if_not_present(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(CORS_ALLOW_METHODS),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("content-type"),
            ))
            .layer(cors)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<CodeRegistry>,
    config: Arc<RegistryConfig>,
    started_at: Instant,
}

impl AppState {
    fn lookup(&self, code: &str) -> Option<Entry> {
        if self.config.strict_freshness {
            self.registry.get_fresh(code, self.config.ttl, Utc::now())
        } else {
            self.registry.get(code)
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a code
///
/// The body is parsed by hand so that `Content-Type` is not required. Only
/// unparsable bodies are `Invalid JSON`; any well-formed value lacking the
/// three string fields is `Missing required fields`.
async fn register_code(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let body = body.map_err(|rejection| {
        debug!("Rejecting register body: {}", rejection);
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::InvalidJson
        }
    })?;

    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejecting register body: {}", e);
        ApiError::InvalidJson
    })?;

    let (code, virtual_ip, public_ip) = RegisterRequest::from(&value)
        .into_parts()
        .ok_or(ApiError::MissingFields)?;

    let replaced = state
        .registry
        .put(code.as_str(), virtual_ip.as_str(), public_ip.as_str());

    info!(
        "Registered {} -> {} ({}){}",
        code,
        virtual_ip,
        public_ip,
        if replaced { " [overwrote]" } else { "" }
    );

    Ok(Json(RegisterResponse {
        success: true,
        code,
    }))
}

/// Look up the addresses registered under a code
async fn lookup_code(
    State(state): State<AppState>,
    params: Option<Query<LookupParams>>,
) -> Result<Json<LookupResponse>, ApiError> {
    let code = params
        .and_then(|Query(params)| params.code())
        .ok_or(ApiError::MissingCode)?;

    match state.lookup(&code) {
        Some(entry) => {
            info!(
                "Lookup {} -> {} ({})",
                code, entry.virtual_address, entry.public_address
            );
            Ok(Json(entry.into()))
        }
        None => {
            debug!("Lookup miss: {}", code);
            Err(ApiError::CodeNotFound)
        }
    }
}

/// Active code count and uptime
async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        active_codes: state.registry.size(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

/// Health check
async fn health_banner() -> &'static str {
    HEALTH_BANNER
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
