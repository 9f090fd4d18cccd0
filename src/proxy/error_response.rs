//! Unified error response handling for the gateway
//!
//! Every error the gateway itself produces (as opposed to relaying an
//! upstream reply) is rendered through [`ErrorResponse`], so clients see one
//! JSON shape and the exchange identifier for correlation.

use crate::proxy::types::{ProxyError, EXCHANGE_ID_HEADER};
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Exchange ID for correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
            details: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert to HTTP response, echoing the exchange ID as a header
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self)).into_response();

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response
                    .headers_mut()
                    .insert(EXCHANGE_ID_HEADER, header_value);
            }
        }

        response
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    fn to_error_response(&self) -> ErrorResponse;

    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for ProxyError {
    fn to_error_response(&self) -> ErrorResponse {
        use ProxyError::*;

        match self {
            NoProvider { path } => ErrorResponse::new("NO_PROVIDER", self.to_string())
                .with_details(serde_json::json!({ "path": path })),
            MalformedStreamFlag(_) => ErrorResponse::new("MALFORMED_STREAM_FLAG", self.to_string()),
            RequestTooLarge { .. } => ErrorResponse::new("REQUEST_TOO_LARGE", self.to_string()),
            ResponseTooLarge { .. } => ErrorResponse::new("RESPONSE_TOO_LARGE", self.to_string()),
            Preparation(msg) => ErrorResponse::new("INVALID_UPSTREAM_REQUEST", msg.clone()),
            InvalidTargetUrl(_) => ErrorResponse::new("INVALID_TARGET_URL", self.to_string()),
            UpstreamUnreachable(_) => ErrorResponse::new("BAD_GATEWAY", self.to_string()),
            UpstreamTimeout(_) => ErrorResponse::new("GATEWAY_TIMEOUT", self.to_string()),
            ApprovalTimeout(_) => ErrorResponse::new("APPROVAL_TIMEOUT", self.to_string()),
            ShuttingDown => ErrorResponse::new("SERVICE_UNAVAILABLE", self.to_string()),
            HttpError(e) => ErrorResponse::new("HTTP_ERROR", format!("HTTP error: {e}")),
            Internal(msg) => ErrorResponse::new("INTERNAL_ERROR", msg.clone()),
        }
    }

    fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            NoProvider { .. } | MalformedStreamFlag(_) | Preparation(_) => StatusCode::BAD_REQUEST,
            RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ResponseTooLarge { .. } | InvalidTargetUrl(_) | UpstreamUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }
            UpstreamTimeout(_) | ApprovalTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            HttpError(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error conversion for Axum responses using standardized format
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.to_error_response().into_response_with_status(status)
    }
}
