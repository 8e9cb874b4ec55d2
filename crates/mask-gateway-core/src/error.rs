//! Error taxonomy for the mask/forward/unmask pipeline

use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Pipeline failures. Display strings never carry user content, only
/// offsets, counts, status codes and provider error text.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Inbound body does not carry a string `messages[-1].content`
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Entity detector failed or produced invalid spans
    #[error("Entity detection failed: {0}")]
    Detection(String),

    /// Internal masking invariant was violated
    #[error("Anonymization failed: {0}")]
    Anonymization(String),

    /// Connection, TLS or timeout failure reaching the provider
    #[error("Upstream transport error: {message}")]
    UpstreamTransport { message: String, timed_out: bool },

    /// Provider answered with an error object, a non-2xx status or an
    /// unusable body
    #[error("Upstream API error: {message}")]
    UpstreamApi { status: Option<u16>, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    DetectionFailure,
    AnonymizationFailure,
    UpstreamTransportError,
    UpstreamApiError,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GatewayError::Detection(_) => ErrorKind::DetectionFailure,
            GatewayError::Anonymization(_) => ErrorKind::AnonymizationFailure,
            GatewayError::UpstreamTransport { .. } => ErrorKind::UpstreamTransportError,
            GatewayError::UpstreamApi { .. } => ErrorKind::UpstreamApiError,
        }
    }

    pub(crate) fn transport(err: reqwest::Error) -> Self {
        // reqwest's Display may embed the URL but never the request body
        GatewayError::UpstreamTransport {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Position and category of a JSON error. serde_json's own message can quote
/// the offending value, which may be an entity.
pub(crate) fn json_error_summary(err: &serde_json::Error) -> String {
    format!("{:?} error at line {} column {}", err.classify(), err.line(), err.column())
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::DetectionFailure => "detection_failure",
            ErrorKind::AnonymizationFailure => "anonymization_failure",
            ErrorKind::UpstreamTransportError => "upstream_transport_error",
            ErrorKind::UpstreamApiError => "upstream_api_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
