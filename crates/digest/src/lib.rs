//! HTTP Digest authentication for the SDC north-bound interface.
//!
//! Devices answer an unauthenticated request with a `WWW-Authenticate: Digest`
//! challenge. Only the basic RFC 2617 construction is supported:
//!
//! ```text
//! response = H(H(username:realm:password):nonce:H(method:uri))
//! ```
//!
//! where `H` is MD5 or SHA-256 (hex encoded). There is no `qop`, `cnonce`
//! or nonce-count handling; the devices do not advertise them.

mod challenge;
mod error;
mod response;

pub use challenge::{Challenge, parse_challenge};
pub use error::DigestError;
pub use response::{Algorithm, authorization, compute_response};

/// Header carrying the device challenge.
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
