//! Error types for the backend gateway.

use serde_json::Value;
use thiserror::Error;

/// Additional context from backend errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the backend.
    pub http_status: Option<u16>,
    /// Request ID from the backend (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Rejected before sending: the request violates the backend's bounds.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The backend answered with an error status.
    #[error("backend error (HTTP {status}): {detail}")]
    Backend {
        status: u16,
        detail: String,
        context: ErrorContext,
    },

    /// The response body could not be read as the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (bad base URL, header value, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl BackendError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn backend(status: u16, detail: impl Into<String>, context: ErrorContext) -> Self {
        Self::Backend {
            status,
            detail: detail.into(),
            context,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Backend { status, .. } if *status >= 500 => "backend_unavailable",
            Self::Backend { .. } => "backend_rejected",
            Self::Decode(_) => "decode_error",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Text shown in the failing region: the backend's `detail` when it sent
    /// one, otherwise the error itself.
    pub fn display_message(&self) -> String {
        match self {
            Self::Backend { detail, .. } => detail.clone(),
            Self::InvalidRequest { message } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Backend { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

/// Pull a human-readable message out of an error body.
///
/// FastAPI sends `{"detail": "..."}` for handled errors and
/// `{"detail": [{"loc": [...], "msg": "..."}]}` for validation failures.
pub(crate) fn detail_from_body(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    match parsed.as_ref().and_then(|v| v.get("detail")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => {
            let msgs: Vec<String> = items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => match item.get("loc").and_then(Value::as_array) {
                        Some(loc) => format!("{}: {msg}", join_loc(loc)),
                        None => msg.to_string(),
                    },
                    None => item.to_string(),
                })
                .collect();
            msgs.join("; ")
        }
        Some(other) => other.to_string(),
        None if !body.trim().is_empty() && body.len() <= 512 => body.trim().to_string(),
        None => format!("HTTP {status}"),
    }
}

fn join_loc(loc: &[Value]) -> String {
    loc.iter()
        .map(|p| match p {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}
