//! Client role: requests from us to the device.
//!
//! [`HttpClient::send_request`] implements the Digest handshake: when Digest
//! credentials are configured, every request is preceded by a probe (same
//! method, URI and headers, empty body) whose challenge is answered on the
//! real request. Nonces are never reused, so a Digest-protected call always
//! costs two round trips. Both run under the same [`TransportGuard`].

use std::collections::BTreeMap;

use bytes::Bytes;
use holosens_digest::{DigestError, WWW_AUTHENTICATE, parse_challenge};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::JSON_UTF8;
use crate::auth::{AuthScheme, Credentials};
use crate::error::HttpConnError;
use crate::multipart::{MultipartForm, generate_boundary};
use crate::transport::TransportGuard;

/// Characters left as-is in query keys and values (RFC 3986 unreserved).
const QUERY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Client-role view of a locked transport.
pub struct HttpClient<'g> {
    guard: &'g mut TransportGuard,
}

impl<'g> HttpClient<'g> {
    pub(crate) fn new(guard: &'g mut TransportGuard) -> Self {
        Self { guard }
    }

    pub fn get(self, url: &str) -> ClientRequest<'g> {
        self.request(Method::GET, url)
    }

    pub fn post(self, url: &str) -> ClientRequest<'g> {
        self.request(Method::POST, url)
    }

    pub fn put(self, url: &str) -> ClientRequest<'g> {
        self.request(Method::PUT, url)
    }

    pub fn delete(self, url: &str) -> ClientRequest<'g> {
        self.request(Method::DELETE, url)
    }

    pub fn request(self, method: Method, url: &str) -> ClientRequest<'g> {
        ClientRequest {
            client: self,
            method,
            url: url.to_string(),
            headers: HeaderMap::new(),
            query: BTreeMap::new(),
            body: Bytes::new(),
            error: None,
        }
    }

    /// Sends `req` and returns the response whatever its status.
    ///
    /// Authorization is added according to the configured credentials.
    pub async fn send_request(
        &mut self,
        mut req: Request<Bytes>,
    ) -> Result<Response<Bytes>, HttpConnError> {
        let credentials = self.guard.credentials().clone();
        match credentials.scheme {
            AuthScheme::None => {}
            AuthScheme::Basic => {
                let value = HeaderValue::from_str(&credentials.basic_authorization())
                    .map_err(http::Error::from)?;
                req.headers_mut().insert(AUTHORIZATION, value);
            }
            AuthScheme::Digest => {
                if let Some(value) = self.digest_authorization(&req, &credentials).await? {
                    req.headers_mut().insert(AUTHORIZATION, value);
                }
            }
        }
        self.round_trip(&req).await
    }

    async fn round_trip(&mut self, req: &Request<Bytes>) -> Result<Response<Bytes>, HttpConnError> {
        self.guard.write_request(req).await?;
        let res = self.guard.read_response(req.method()).await?;
        debug!(method = %req.method(), uri = %req.uri(), status = %res.status(), "exchange complete");
        Ok(res)
    }

    /// Runs the probe and answers its challenge. `None` when the device
    /// answered the probe without one.
    async fn digest_authorization(
        &mut self,
        req: &Request<Bytes>,
        credentials: &Credentials,
    ) -> Result<Option<HeaderValue>, HttpConnError> {
        let mut probe = Request::new(Bytes::new());
        *probe.method_mut() = req.method().clone();
        *probe.uri_mut() = req.uri().clone();
        *probe.headers_mut() = req.headers().clone();
        probe.headers_mut().remove(AUTHORIZATION);

        let res = self.round_trip(&probe).await?;
        let values = res
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok());
        let challenge = match parse_challenge(values) {
            Ok(challenge) => challenge,
            Err(DigestError::MissingChallenge) => {
                debug!(status = %res.status(), "probe answered without a Digest challenge");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let value = holosens_digest::authorization(
            &challenge,
            req.method().as_str(),
            request_target(req.uri()),
            &credentials.username,
            &credentials.password,
        )?;
        let value = HeaderValue::from_str(&value).map_err(http::Error::from)?;
        Ok(Some(value))
    }
}

/// Origin-form target used as the Digest `uri` directive.
fn request_target(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or("/")
}

/// Fluent request under construction. Errors are kept until it is sent.
pub struct ClientRequest<'g> {
    client: HttpClient<'g>,
    method: Method,
    url: String,
    headers: HeaderMap,
    query: BTreeMap<String, Vec<String>>,
    body: Bytes,
    error: Option<HttpConnError>,
}

impl<'g> ClientRequest<'g> {
    /// Sets a header, replacing any previous values.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    /// Appends a header value.
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

    /// Sets a query parameter, replacing any previous values.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.insert(key.to_string(), vec![value.to_string()]);
        self
    }

    /// Appends a query parameter value.
    pub fn add_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON body with `Content-Type: application/json; charset=UTF-8`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = body.into();
                self.content_type(JSON_UTF8)
            }
            Err(e) => {
                self.fail(e.into());
                self
            }
        }
    }

    pub fn multipart(mut self, form: &MultipartForm) -> Self {
        let boundary = generate_boundary();
        self.body = form.encode(&boundary);
        self.content_type(&format!("multipart/form-data; boundary={boundary}"))
    }

    fn fail(&mut self, error: HttpConnError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn into_parts(self) -> Result<(HttpClient<'g>, Request<Bytes>), HttpConnError> {
        let Self {
            client,
            method,
            url,
            headers,
            query,
            body,
            error,
        } = self;
        if let Some(e) = error {
            return Err(e);
        }

        let url = if query.is_empty() {
            url
        } else {
            let base = url.split('?').next().unwrap_or_default();
            format!("{base}?{}", encode_query(&query))
        };
        let uri: Uri = url.parse().map_err(http::Error::from)?;

        let mut req = Request::new(body);
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;
        Ok((client, req))
    }

    /// Sends the request; any status is returned as-is.
    pub async fn send_raw(self) -> Result<Response<Bytes>, HttpConnError> {
        let (mut client, req) = self.into_parts()?;
        client.send_request(req).await
    }

    /// Sends the request; a non-2xx status becomes
    /// [`HttpConnError::RequestFailed`].
    pub async fn send(self) -> Result<Response<Bytes>, HttpConnError> {
        ensure_success(self.send_raw().await?)
    }

    /// Sends the request and decodes a 2xx JSON body.
    pub async fn decode_json<T: DeserializeOwned>(self) -> Result<T, HttpConnError> {
        let res = self.send().await?;
        Ok(serde_json::from_slice(res.body())?)
    }

    /// Sends the request and decodes a 2xx `multipart/form-data` body of at
    /// most `max_size` bytes.
    pub async fn decode_multipart(self, max_size: usize) -> Result<MultipartForm, HttpConnError> {
        let res = self.send().await?;
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        MultipartForm::decode(&content_type, res.into_body(), max_size).await
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpConnError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?;
    let value = HeaderValue::from_str(value).map_err(http::Error::from)?;
    Ok((name, value))
}

/// `key=value&...` with keys sorted.
fn encode_query(query: &BTreeMap<String, Vec<String>>) -> String {
    query
        .iter()
        .flat_map(|(key, values)| {
            values.iter().map(move |value| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, QUERY_SET),
                    utf8_percent_encode(value, QUERY_SET)
                )
            })
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Maps a non-2xx response to [`HttpConnError::RequestFailed`] carrying the
/// body text, or the status line when the body is empty.
pub(crate) fn ensure_success(res: Response<Bytes>) -> Result<Response<Bytes>, HttpConnError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = String::from_utf8_lossy(res.body()).trim().to_string();
    let message = if text.is_empty() {
        status_line(status)
    } else {
        text
    };
    Err(HttpConnError::RequestFailed { status, message })
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}
