//! Digest response computation and `Authorization` header assembly.

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::challenge::Challenge;
use crate::error::DigestError;

/// Hash algorithms the devices advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha256,
}

impl Algorithm {
    /// Parses an `algorithm` directive (case-insensitive).
    pub fn parse(name: &str) -> Result<Self, DigestError> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("MD5") {
            Ok(Self::Md5)
        } else if name.eq_ignore_ascii_case("SHA-256") {
            Ok(Self::Sha256)
        } else {
            Err(DigestError::UnsupportedAlgorithm(name.to_string()))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }

    /// Hex digest of `parts` joined with `:`.
    fn hex_digest(self, parts: &[&str]) -> String {
        match self {
            Self::Md5 => hex_digest::<Md5>(parts),
            Self::Sha256 => hex_digest::<Sha256>(parts),
        }
    }
}

fn hex_digest<D: Digest>(parts: &[&str]) -> String {
    let mut hasher = D::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Computes `H(H(username:realm:password):nonce:H(method:uri))`.
///
/// Fails for any algorithm other than MD5 and SHA-256; an empty digest is
/// never returned.
pub fn compute_response(
    method: &str,
    uri: &str,
    realm: &str,
    nonce: &str,
    algorithm: &str,
    username: &str,
    password: &str,
) -> Result<String, DigestError> {
    let algorithm = Algorithm::parse(algorithm)?;
    let ha1 = algorithm.hex_digest(&[username, realm, password]);
    let ha2 = algorithm.hex_digest(&[method, uri]);
    Ok(algorithm.hex_digest(&[&ha1, nonce, &ha2]))
}

/// Builds the `Authorization` header value answering `challenge`.
///
/// The algorithm is echoed exactly as the device advertised it.
pub fn authorization(
    challenge: &Challenge,
    method: &str,
    uri: &str,
    username: &str,
    password: &str,
) -> Result<String, DigestError> {
    let response = compute_response(
        method,
        uri,
        &challenge.realm,
        &challenge.nonce,
        &challenge.algorithm,
        username,
        password,
    )?;

    Ok(format!(
        r#"Digest username="{username}", realm="{}", nonce="{}", uri="{uri}", algorithm="{}", response="{response}""#,
        challenge.realm, challenge.nonce, challenge.algorithm,
    ))
}
