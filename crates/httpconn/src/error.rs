//! Error types for the socket transport.

use http::StatusCode;
use holosens_digest::DigestError;

/// Errors produced by the socket transport and its request/response helpers.
#[derive(Debug, thiserror::Error)]
pub enum HttpConnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("private protocol header error: {0}")]
    Framing(String),

    #[error("authentication challenge error: {0}")]
    AuthChallenge(#[from] DigestError),

    #[error("request failed ({status}): {message}")]
    RequestFailed { status: StatusCode, message: String },

    #[error("device error {code}: {message}")]
    Device { code: i32, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("multipart error: {0}")]
    Multipart(#[from] multer::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),
}

impl HttpConnError {
    /// Returns `true` when the connection itself is unusable.
    ///
    /// The transport closes itself after any fatal error; the other kinds
    /// only fail the exchange in flight.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout | Self::Closed | Self::Protocol(_)
        )
    }
}
