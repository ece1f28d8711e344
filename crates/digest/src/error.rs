//! Error types for Digest authentication.

/// Errors produced while parsing a challenge or computing a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("no Digest challenge in response")]
    MissingChallenge,

    #[error("Digest challenge is missing the {0} directive")]
    MissingDirective(&'static str),

    #[error("unsupported Digest algorithm: {0:?}")]
    UnsupportedAlgorithm(String),
}
