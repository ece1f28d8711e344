//! The `ResponseStatus` envelope shared by device replies and our
//! acknowledgments.

use holosens_httpconn::HttpConnError;
use serde::{Deserialize, Serialize};

/// Status code for success.
pub const STATUS_OK: i32 = 0;

/// Status code we send for a failed request.
pub const STATUS_FAILED: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseStatus {
    /// Target of the request this answers.
    #[serde(rename = "RequestURL", default, skip_serializing_if = "String::is_empty")]
    pub request_url: String,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub status_string: String,
}

impl ResponseStatus {
    pub fn success(request_url: impl Into<String>) -> Self {
        Self {
            request_url: request_url.into(),
            status_code: STATUS_OK,
            status_string: "OK".into(),
        }
    }

    pub fn failed(request_url: impl Into<String>) -> Self {
        Self {
            request_url: request_url.into(),
            status_code: STATUS_FAILED,
            status_string: "FAILED".into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// Maps a non-zero status code to [`HttpConnError::Device`].
    pub fn into_result(self) -> Result<(), HttpConnError> {
        if self.is_success() {
            return Ok(());
        }
        Err(HttpConnError::Device {
            code: self.status_code,
            message: self.status_string,
        })
    }
}

/// `{"ResponseStatus": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope<T = ResponseStatus> {
    pub response_status: T,
}

impl ResponseEnvelope {
    pub fn success(request_url: impl Into<String>) -> Self {
        Self {
            response_status: ResponseStatus::success(request_url),
        }
    }

    pub fn failed(request_url: impl Into<String>) -> Self {
        Self {
            response_status: ResponseStatus::failed(request_url),
        }
    }
}
