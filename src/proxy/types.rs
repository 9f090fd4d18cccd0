//! Type definitions for the proxy module

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ========== Size Types ==========

/// Maximum size for inbound request bodies in bytes
#[nutype(
    validate(greater = 0),
    default = 10_485_760,
    derive(Clone, Copy, Debug, Display, Default, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct RequestSizeLimit(usize);

/// Maximum size for buffered upstream response bodies in bytes
#[nutype(
    validate(greater = 0),
    default = 104_857_600,
    derive(Clone, Copy, Debug, Display, Default, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct ResponseSizeLimit(usize);

// ========== Time Types ==========

/// Duration in milliseconds
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    From,
    AsRef
))]
pub struct DurationMillis(u64);

impl DurationMillis {
    pub fn from_duration(duration: Duration) -> Self {
        Self::new(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

// ========== Identifiers ==========

/// Identifier of one exchange, shared by its request record, response
/// record, approval ticket and events.
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    From,
    AsRef
))]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Create a time-ordered identifier
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self::new)
    }
}

/// Identifier of a stored response record
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    From,
    AsRef
))]
pub struct ResponseId(Uuid);

impl ResponseId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

// ========== Constants ==========

/// Response header carrying the exchange identifier back to the client
pub const EXCHANGE_ID_HEADER: &str = "x-gateway-exchange-id";

/// Provider name recorded for requests that matched no provider
pub const UNMATCHED_PROVIDER: &str = "unmatched";

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Maximum request size in bytes
    pub max_request_size: RequestSizeLimit,
    /// Maximum buffered response size in bytes
    pub max_response_size: ResponseSizeLimit,
    /// Upper bound for an upstream call to produce its response head
    /// (and, on the buffered path, its full body)
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_request_size: RequestSizeLimit::default(),
            max_response_size: ResponseSizeLimit::default(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Errors that can occur while driving an exchange
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No provider found for path: {path}")]
    NoProvider { path: String },

    #[error("Malformed stream flag: {0}")]
    MalformedStreamFlag(String),

    #[error("Request too large (max: {max_size} bytes)")]
    RequestTooLarge { max_size: RequestSizeLimit },

    #[error("Response too large (max: {max_size} bytes)")]
    ResponseTooLarge { max_size: ResponseSizeLimit },

    #[error("Failed to prepare upstream request: {0}")]
    Preparation(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidTargetUrl(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream timeout after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Approval timeout after {0:?}")]
    ApprovalTimeout(Duration),

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Failures that leave the exchange with an error-flagged response record
    pub fn is_gateway_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamUnreachable(_)
                | ProxyError::UpstreamTimeout(_)
                | ProxyError::ApprovalTimeout(_)
                | ProxyError::ShuttingDown
                | ProxyError::ResponseTooLarge { .. }
        )
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
