//! Provider-shaped synthetic error bodies returned by operator overrides

use super::constants::error_messages::{generic, openai, replicate};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Synthetic outcome an operator can force on a pending exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Error400,
    Error500,
    ContentSensitive,
}

impl OverrideAction {
    pub const ALL: [OverrideAction; 3] = [
        OverrideAction::Error400,
        OverrideAction::Error500,
        OverrideAction::ContentSensitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::Error400 => "error_400",
            OverrideAction::Error500 => "error_500",
            OverrideAction::ContentSensitive => "content_sensitive",
        }
    }

    /// Status code the synthetic reply carries
    pub fn status(&self) -> StatusCode {
        match self {
            OverrideAction::Error400 | OverrideAction::ContentSensitive => StatusCode::BAD_REQUEST,
            OverrideAction::Error500 => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for OverrideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid action: must be error_400, error_500, or content_sensitive")]
pub struct InvalidOverrideAction;

impl FromStr for OverrideAction {
    type Err = InvalidOverrideAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OverrideAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or(InvalidOverrideAction)
    }
}

/// A complete synthetic reply: status plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct CannedResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl CannedResponse {
    pub fn body_bytes(&self) -> Vec<u8> {
        self.body.to_string().into_bytes()
    }
}

/// `{"error": {"message", "type", "param", "code"}}`
pub fn openai_error(action: OverrideAction) -> CannedResponse {
    let (message, kind, code) = match action {
        OverrideAction::Error400 => (openai::ERROR_400, openai::TYPE_INVALID_REQUEST, None),
        OverrideAction::Error500 => (openai::ERROR_500, openai::TYPE_SERVER_ERROR, None),
        OverrideAction::ContentSensitive => (
            openai::CONTENT_SENSITIVE,
            openai::TYPE_IMAGE_GENERATION_USER_ERROR,
            Some(openai::CODE_MODERATION_BLOCKED),
        ),
    };

    CannedResponse {
        status: action.status(),
        body: json!({
            "error": {
                "message": message,
                "type": kind,
                "param": null,
                "code": code,
            }
        }),
    }
}

/// `{"detail": "..."}`
pub fn replicate_error(action: OverrideAction) -> CannedResponse {
    let detail = match action {
        OverrideAction::Error400 => replicate::ERROR_400,
        OverrideAction::Error500 => replicate::ERROR_500,
        OverrideAction::ContentSensitive => replicate::CONTENT_SENSITIVE,
    };

    CannedResponse {
        status: action.status(),
        body: json!({ "detail": detail }),
    }
}

/// `{"error": "..."}` for providers without a known envelope
pub fn generic_error(action: OverrideAction) -> CannedResponse {
    let message = match action {
        OverrideAction::Error400 => generic::ERROR_400,
        OverrideAction::Error500 => generic::ERROR_500,
        OverrideAction::ContentSensitive => generic::CONTENT_SENSITIVE,
    };

    CannedResponse {
        status: action.status(),
        body: json!({ "error": message }),
    }
}
