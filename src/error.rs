//! Error types for the proxy.
//!
//! The variants follow the failure taxonomy the proxy exposes to clients: a malformed
//! inbound request, an upstream that answered with an error, an upstream that went quiet,
//! and an upstream whose reply could not be understood.

use crate::translate::anthropic_types::ErrorResponse;
use crate::translate::openai_types::ChatErrorResponse;
use crate::translate::response::openai_error_to_anthropic;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;
use thiserror::Error;

/// Which upstream deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    FirstByte,
    StreamIdle,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "connection establishment"),
            TimeoutPhase::FirstByte => write!(f, "first byte"),
            TimeoutPhase::StreamIdle => write!(f, "next stream chunk"),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Provider returned status {status}: {}", truncate(body, 500))]
    Upstream { status: u16, body: String },

    #[error("Timed out waiting for {phase} from provider")]
    UpstreamTimeout { phase: TimeoutPhase },

    #[error("Unexpected provider response: {message} (fragment: {})", truncate(fragment, 300))]
    UpstreamProtocol { message: String, fragment: String },

    #[error("Malformed arguments for tool call {tool_call_id}: {source} (raw: {})", truncate(raw, 300))]
    MalformedToolArguments {
        tool_call_id: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    pub fn timeout(phase: TimeoutPhase) -> Self {
        Self::UpstreamTimeout { phase }
    }

    pub fn protocol(msg: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            message: msg.into(),
            fragment: fragment.into(),
        }
    }

    /// HTTP status the client sees for this failure.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Validation { .. } => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamProtocol { .. }
            | ProxyError::MalformedToolArguments { .. }
            | ProxyError::Http(_)
            | ProxyError::Json(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Config { .. } | ProxyError::Io(_) | ProxyError::Toml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Render as an Anthropic error envelope.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ProxyError::Validation { message } => ErrorResponse::invalid_request(message.clone()),
            ProxyError::PayloadTooLarge { .. } => ErrorResponse::request_too_large(self.to_string()),
            ProxyError::Upstream { status, body } => {
                match serde_json::from_str::<ChatErrorResponse>(body) {
                    Ok(err) => openai_error_to_anthropic(&err),
                    Err(_) => ErrorResponse::api_error(format!(
                        "Provider returned status {}: {}",
                        status,
                        truncate(body, 500)
                    )),
                }
            }
            ProxyError::UpstreamTimeout { .. } => ErrorResponse::timeout(self.to_string()),
            _ => ErrorResponse::api_error(self.to_string()),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_error_response())).into_response()
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub type Result<T> = std::result::Result<T, ProxyError>;
