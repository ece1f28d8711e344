//! Server role: requests pushed by the device to us.

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::JSON_UTF8;
use crate::client::parse_header;
use crate::error::HttpConnError;
use crate::transport::TransportGuard;

/// Server-role view of a locked transport.
pub struct HttpServer<'g> {
    guard: &'g mut TransportGuard,
}

impl<'g> HttpServer<'g> {
    pub(crate) fn new(guard: &'g mut TransportGuard) -> Self {
        Self { guard }
    }

    /// Blocks until one complete request has been read.
    pub async fn receive_request(&mut self) -> Result<Request<Bytes>, HttpConnError> {
        let req = self.guard.read_request().await?;
        debug!(method = %req.method(), uri = %req.uri(), bytes = req.body().len(), "request received");
        Ok(req)
    }

    pub async fn send_response(&mut self, res: Response<Bytes>) -> Result<(), HttpConnError> {
        self.guard.write_response(&res).await
    }

    /// Response builder defaulting to `200 OK`, `Connection: keep-alive`
    /// and a UTF-8 JSON content type.
    pub fn respond(self) -> ServerResponse<'g> {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
        ServerResponse {
            guard: self.guard,
            status: StatusCode::OK,
            headers,
            error: None,
        }
    }
}

/// Fluent response under construction. Errors are kept until it is sent.
pub struct ServerResponse<'g> {
    guard: &'g mut TransportGuard,
    status: StatusCode,
    headers: HeaderMap,
    error: Option<HttpConnError>,
}

impl ServerResponse<'_> {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn content_type(self, value: &str) -> Self {
        self.header(CONTENT_TYPE.as_str(), value)
    }

    fn fail(&mut self, error: HttpConnError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Sends `value` as a JSON body.
    pub async fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<(), HttpConnError> {
        let body = serde_json::to_vec(value)?;
        self.content_type(JSON_UTF8).data(body).await
    }

    /// Sends raw bytes as the body.
    pub async fn data(self, body: impl Into<Bytes>) -> Result<(), HttpConnError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut res = Response::new(body.into());
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        self.guard.write_response(&res).await
    }

    /// Sends the response with an empty body.
    pub async fn send(self) -> Result<(), HttpConnError> {
        self.data(Bytes::new()).await
    }
}

/// Decodes a request body as JSON.
pub fn bind_json<T: DeserializeOwned>(req: &Request<Bytes>) -> Result<T, HttpConnError> {
    Ok(serde_json::from_slice(req.body())?)
}
