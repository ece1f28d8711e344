//! HTTP over a raw device socket.
//!
//! A HoloSens SDC speaks plain HTTP/1.1 over one TCP (or TLS) connection
//! that may have been opened by either side. [`SocketTransport`] owns that
//! connection and lets the library act as an HTTP server for the device's
//! registration push, then as an HTTP client for every later call.
//!
//! Only one exchange is ever on the wire: holding a [`TransportGuard`]
//! (from [`SocketTransport::lock`]) is what grants the right to talk, and
//! it must be held for the whole logical operation, including the Digest
//! probe round trip.
//!
//! Legacy firmware wraps messages in a fixed-length
//! [`PrivateProtocolHeader`]; it is configured per role on the guard.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod multipart;
pub mod server;
pub mod transport;
mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthScheme, AuthState, Credentials};
pub use client::{ClientRequest, HttpClient};
pub use config::TransportConfig;
pub use error::HttpConnError;
pub use framing::PrivateProtocolHeader;
pub use multipart::{MultipartForm, Part};
pub use server::{HttpServer, ServerResponse, bind_json};
pub use transport::{Connection, SocketTransport, TransportGuard};

pub use bytes::Bytes;
pub use http::{HeaderMap, Method, Request, Response, StatusCode};

use std::time::Duration;

/// Default read deadline per exchange.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default write deadline per message.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a start line plus headers.
pub const DEFAULT_MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on a single message body (snapshots are the largest payloads).
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Content type the device expects on query-only requests.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Content type of every JSON body we send.
pub const JSON_UTF8: &str = "application/json; charset=UTF-8";
