//! HTTP/1.1 message encoding and decoding on a buffered stream.
//!
//! Heads are read line by line up to the configured limit and parsed with
//! `httparse`. Bodies are delimited by `Content-Length`, by chunked
//! transfer coding, or (responses only) by the peer closing the connection.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::TransportConfig;
use crate::error::HttpConnError;

const MAX_HEADERS: usize = 128;
const MAX_CHUNK_LINE: u64 = 4096;
const USER_AGENT_VALUE: &str = concat!("holosens-httpconn/", env!("CARGO_PKG_VERSION"));

/// Appends the request line, headers and body.
///
/// `Host` is taken from the URI authority when the caller did not set one
/// (empty for origin-form URIs). `Content-Length` is always computed here.
pub(crate) fn encode_request(req: &Request<Bytes>, out: &mut Vec<u8>) {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or("/");
    out.extend_from_slice(format!("{} {target} HTTP/1.1\r\n", req.method()).as_bytes());

    let headers = req.headers();
    if !headers.contains_key(HOST) {
        let host = req.uri().authority().map(|a| a.as_str()).unwrap_or("");
        out.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    }
    if !headers.contains_key(USER_AGENT) {
        out.extend_from_slice(format!("User-Agent: {USER_AGENT_VALUE}\r\n").as_bytes());
    }
    encode_headers(headers, out);

    let body = req.body();
    let needs_length = matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH);
    if !body.is_empty() || needs_length {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
}

/// Appends the status line, headers and body.
pub(crate) fn encode_response(res: &Response<Bytes>, out: &mut Vec<u8>) {
    let status = res.status();
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    encode_headers(res.headers(), out);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", res.body().len()).as_bytes());
    out.extend_from_slice(res.body());
}

fn encode_headers(headers: &HeaderMap, out: &mut Vec<u8>) {
    for (name, value) in headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        out.extend_from_slice(canonical_name(name.as_str()).as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// `content-type` -> `Content-Type`. Some firmware matches header names
/// case-sensitively.
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    out
}

/// Reads one request (head and body).
pub(crate) async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    config: &TransportConfig,
) -> Result<Request<Bytes>, HttpConnError> {
    let head = read_head(reader, config.max_head_size).await?;

    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut raw);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HttpConnError::Protocol("incomplete request head".into()));
        }
        Err(e) => {
            return Err(HttpConnError::Protocol(format!("malformed request head: {e}")));
        }
    }

    let method = parsed
        .method
        .ok_or_else(|| HttpConnError::Protocol("request without method".into()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| HttpConnError::Protocol(format!("invalid method: {e}")))?;
    let uri: Uri = parsed
        .path
        .ok_or_else(|| HttpConnError::Protocol("request without target".into()))?
        .parse()
        .map_err(|e| HttpConnError::Protocol(format!("invalid request target: {e}")))?;
    let version = version(parsed.version);
    let headers = header_map(parsed.headers)?;

    let body = read_body(reader, &headers, false, config.max_body_size).await?;

    let mut req = Request::new(body);
    *req.method_mut() = method;
    *req.uri_mut() = uri;
    *req.version_mut() = version;
    *req.headers_mut() = headers;
    Ok(req)
}

/// Reads one final response, skipping interim 1xx responses.
///
/// `method` is the method of the request being answered; responses to
/// `HEAD` never carry a body.
pub(crate) async fn read_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    method: &Method,
    config: &TransportConfig,
) -> Result<Response<Bytes>, HttpConnError> {
    loop {
        let head = read_head(reader, config.max_head_size).await?;

        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut raw);
        match parsed.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(HttpConnError::Protocol("incomplete response head".into()));
            }
            Err(e) => {
                return Err(HttpConnError::Protocol(format!("malformed response head: {e}")));
            }
        }

        let code = parsed
            .code
            .ok_or_else(|| HttpConnError::Protocol("response without status".into()))?;
        let status = StatusCode::from_u16(code)
            .map_err(|e| HttpConnError::Protocol(format!("invalid status code: {e}")))?;
        let version = version(parsed.version);
        let headers = header_map(parsed.headers)?;

        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            tracing::trace!(status = %status, "skipping interim response");
            continue;
        }

        let bodiless = *method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        let body = if bodiless {
            Bytes::new()
        } else {
            read_body(reader, &headers, true, config.max_body_size).await?
        };

        let mut res = Response::new(body);
        *res.status_mut() = status;
        *res.version_mut() = version;
        *res.headers_mut() = headers;
        return Ok(res);
    }
}

fn version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn header_map(raw: &[httparse::Header<'_>]) -> Result<HeaderMap, HttpConnError> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| HttpConnError::Protocol(format!("invalid header name {:?}: {e}", h.name)))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| HttpConnError::Protocol(format!("invalid value for {}: {e}", h.name)))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Reads up to and including the blank line that ends a message head.
///
/// Blank lines before the start line are skipped (RFC 7230 §3.5).
async fn read_head<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, HttpConnError> {
    let mut head = Vec::with_capacity(512);
    loop {
        if head.len() >= max {
            return Err(HttpConnError::Protocol(format!(
                "message head exceeds {max} bytes"
            )));
        }

        let start = head.len();
        let limit = (max - start) as u64;
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut head).await?;
        if n == 0 {
            if head.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )
                .into());
            }
            return Err(HttpConnError::Protocol("truncated message head".into()));
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    headers: &HeaderMap,
    until_eof: bool,
    max: usize,
) -> Result<Bytes, HttpConnError> {
    if is_chunked(headers) {
        return read_chunked(reader, max).await;
    }

    if let Some(len) = content_length(headers)? {
        if len > max {
            return Err(HttpConnError::Protocol(format!(
                "body of {len} bytes exceeds limit of {max}"
            )));
        }
        let mut body = vec![0u8; len];
        read_exact(reader, &mut body).await?;
        return Ok(body.into());
    }

    if until_eof {
        let mut body = Vec::new();
        (&mut *reader).take(max as u64 + 1).read_to_end(&mut body).await?;
        if body.len() > max {
            return Err(HttpConnError::Protocol(format!(
                "body exceeds limit of {max} bytes"
            )));
        }
        return Ok(body.into());
    }

    Ok(Bytes::new())
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, HttpConnError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(Some)
        .ok_or_else(|| HttpConnError::Protocol(format!("invalid Content-Length: {value:?}")))
}

async fn read_chunked<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Bytes, HttpConnError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| HttpConnError::Protocol(format!("invalid chunk size: {size_str:?}")))?;

        if size == 0 {
            // Trailers are read and dropped.
            while !read_line(reader).await?.is_empty() {}
            return Ok(body.into());
        }

        if size > max.saturating_sub(body.len()) {
            return Err(HttpConnError::Protocol(format!(
                "body exceeds limit of {max} bytes"
            )));
        }
        let start = body.len();
        body.resize(start + size, 0);
        read_exact(reader, &mut body[start..]).await?;

        if !read_line(reader).await?.is_empty() {
            return Err(HttpConnError::Protocol("missing CRLF after chunk".into()));
        }
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, HttpConnError> {
    let mut line = Vec::new();
    (&mut *reader)
        .take(MAX_CHUNK_LINE)
        .read_until(b'\n', &mut line)
        .await?;
    if line.pop() != Some(b'\n') {
        return Err(HttpConnError::Protocol("truncated chunked body".into()));
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| HttpConnError::Protocol("non-UTF-8 chunk line".into()))
}

async fn read_exact<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), HttpConnError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(HttpConnError::Protocol("truncated message body".into()))
        }
        Err(e) => Err(e.into()),
    }
}
