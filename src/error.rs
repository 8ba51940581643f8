//! Error types for the relay.
//!
//! Every failure is caught at the per-request boundary and translated to
//! the best-matching HTTP status. Error messages are short and
//! non-sensitive; the configured credential never appears in them.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use thiserror::Error;

/// Errors that can occur while relaying a request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Invalid URI or target
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Network or TLS failure talking to the upstream (maps to 502)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection refused by the upstream (maps to 502)
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// No response from the upstream within the fixed ceiling (maps to 504)
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Any other failure during relay (maps to 500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Short error-kind label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUri(_) => "invalid_uri",
            Self::Connection(_) => "upstream_connect",
            Self::ConnectionRefused(_) => "upstream_refused",
            Self::Timeout(_) => "upstream_timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert error to an HTTP response with the appropriate status code.
    ///
    /// Only usable while no bytes of the real response have been written;
    /// a mid-stream failure instead surfaces as a body error and the
    /// connection is dropped.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let (status, message) = match self {
            ProxyError::ConnectionRefused(_) | ProxyError::Connection(_) => (
                StatusCode::BAD_GATEWAY,
                "502 Bad Gateway\n\nFailed to connect to upstream server.",
            ),
            ProxyError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "504 Gateway Timeout\n\nUpstream server did not respond in time.",
            ),
            ProxyError::InvalidUri(_) => (
                StatusCode::BAD_REQUEST,
                "400 Bad Request\n\nInvalid request URI.",
            ),
            ProxyError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error\n\nProxy error.",
            ),
        };

        Response::builder()
            .status(status)
            .header("Content-Type", "text/plain")
            .body(Full::new(Bytes::from(message)))
            .unwrap_or_else(|_| {
                let mut resp = Response::new(Full::new(Bytes::from("500 Internal Server Error")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            })
    }
}

/// Result type alias for relay operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Classify a hyper client error into the matching [`ProxyError`] variant.
///
/// The legacy client reports everything as one opaque error type, so the
/// classification goes by message: refusals and timeouts get their own
/// variants, everything else is a generic connection failure.
pub fn map_client_error(e: hyper_util::client::legacy::Error) -> ProxyError {
    use tracing::warn;

    let error_msg = e.to_string().to_lowercase();

    if error_msg.contains("connection refused") {
        warn!(error = %e, "Upstream connection refused");
        return ProxyError::ConnectionRefused(format!("upstream refused connection: {e}"));
    }

    if error_msg.contains("timeout") || error_msg.contains("timed out") {
        warn!(error = %e, "Upstream timeout");
        return ProxyError::Timeout(format!("upstream timeout: {e}"));
    }

    warn!(error = %e, "Upstream error");
    ProxyError::Connection(format!("upstream error: {e}"))
}
