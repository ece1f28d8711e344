use holosens_httpconn::HttpConnError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Http(#[from] HttpConnError),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("instance type mismatch for key {0}")]
    RoleMismatch(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Http(HttpConnError::Io(e))
    }
}
