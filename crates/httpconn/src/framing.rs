//! Legacy private protocol header.
//!
//! Some firmware generations put an opaque fixed-length marker in front of
//! each HTTP message. We never interpret it; it only has to be produced and
//! consumed so the HTTP parser sees a clean start line.
//!
//! ```text
//! [request_prefix bytes][HTTP request...]
//! [response_prefix bytes][HTTP response...]
//! ```
//!
//! Devices that register by push (device-initiated connection) prefix their
//! responses with 8 bytes; see [`PrivateProtocolHeader::legacy_registration`].

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HttpConnError;

/// Length of the response prefix sent by push-registering devices.
pub const LEGACY_RESPONSE_PREFIX_LEN: usize = 8;

/// Fixed prefixes expected before requests and responses.
///
/// An empty prefix means "none on that direction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateProtocolHeader {
    /// Bytes preceding every request.
    pub request_prefix: Bytes,
    /// Bytes preceding every response.
    pub response_prefix: Bytes,
    /// Compare consumed prefixes byte-for-byte instead of only by length.
    pub strict: bool,
}

impl PrivateProtocolHeader {
    /// No request prefix; `len` zero bytes before every response.
    pub fn response_only(len: usize) -> Self {
        Self {
            request_prefix: Bytes::new(),
            response_prefix: Bytes::from(vec![0u8; len]),
            strict: false,
        }
    }

    /// What a push-registering device puts in front of its responses.
    pub fn legacy_registration() -> Self {
        Self::response_only(LEGACY_RESPONSE_PREFIX_LEN)
    }

    pub async fn write_request_head<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
    ) -> Result<(), HttpConnError> {
        write_prefix(writer, &self.request_prefix).await
    }

    pub async fn read_request_head<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<(), HttpConnError> {
        read_prefix(reader, &self.request_prefix, self.strict, "request").await
    }

    pub async fn write_response_head<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
    ) -> Result<(), HttpConnError> {
        write_prefix(writer, &self.response_prefix).await
    }

    pub async fn read_response_head<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<(), HttpConnError> {
        read_prefix(reader, &self.response_prefix, self.strict, "response").await
    }
}

async fn write_prefix<W: AsyncWrite + Unpin>(
    writer: &mut W,
    prefix: &[u8],
) -> Result<(), HttpConnError> {
    if prefix.is_empty() {
        return Ok(());
    }
    writer.write_all(prefix).await?;
    Ok(())
}

async fn read_prefix<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected: &[u8],
    strict: bool,
    side: &str,
) -> Result<(), HttpConnError> {
    if expected.is_empty() {
        return Ok(());
    }

    let mut buf = vec![0u8; expected.len()];
    if let Err(e) = reader.read_exact(&mut buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(HttpConnError::Framing(format!(
                "{side} prefix truncated: expected {} bytes",
                expected.len()
            )));
        }
        return Err(e.into());
    }

    if strict && buf != expected {
        return Err(HttpConnError::Framing(format!(
            "{side} prefix mismatch: expected {}, got {}",
            hex::encode(expected),
            hex::encode(&buf)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(req: &[u8], res: &[u8], strict: bool) -> PrivateProtocolHeader {
        PrivateProtocolHeader {
            request_prefix: Bytes::copy_from_slice(req),
            response_prefix: Bytes::copy_from_slice(res),
            strict,
        }
    }

    #[tokio::test]
    async fn empty_prefix_is_a_no_op() {
        let h = PrivateProtocolHeader::default();
        let mut buf = Vec::new();
        h.write_request_head(&mut buf).await.unwrap();
        h.write_response_head(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        let data = b"GET / HTTP/1.1\r\n";
        let mut cursor = &data[..];
        h.read_request_head(&mut cursor).await.unwrap();
        assert_eq!(cursor, &data[..]);
    }

    #[tokio::test]
    async fn prefix_is_consumed_for_every_length() {
        for len in 0..=16usize {
            let prefix: Vec<u8> = (0..len as u8).collect();
            let h = header(&prefix, &prefix, true);

            let mut buf = Vec::new();
            h.write_response_head(&mut buf).await.unwrap();
            buf.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
            assert_eq!(buf.len(), len + 17);

            let mut cursor = &buf[..];
            h.read_response_head(&mut cursor).await.unwrap();
            assert_eq!(cursor, b"HTTP/1.1 200 OK\r\n");
        }
    }

    #[tokio::test]
    async fn legacy_registration_reads_eight_bytes() {
        let h = PrivateProtocolHeader::legacy_registration();
        assert!(h.request_prefix.is_empty());

        let data = b"\x01\x02\x03\x04\x05\x06\x07\x08HTTP/1.1 200 OK\r\n";
        let mut cursor = &data[..];
        h.read_response_head(&mut cursor).await.unwrap();
        assert!(cursor.starts_with(b"HTTP/1.1"));
    }

    #[tokio::test]
    async fn truncated_prefix_is_a_framing_error() {
        let h = PrivateProtocolHeader::response_only(8);
        let data = [0u8; 5];
        let mut cursor = &data[..];
        let err = h.read_response_head(&mut cursor).await.unwrap_err();
        assert!(matches!(err, HttpConnError::Framing(_)), "{err:?}");
    }

    #[tokio::test]
    async fn strict_mismatch_is_a_framing_error() {
        let h = header(b"", b"SDC\0", true);
        let data = b"XXXXHTTP/1.1 200 OK\r\n";
        let mut cursor = &data[..];
        let err = h.read_response_head(&mut cursor).await.unwrap_err();
        assert!(matches!(err, HttpConnError::Framing(_)), "{err:?}");
    }

    #[tokio::test]
    async fn lenient_mode_ignores_content() {
        let h = header(b"", b"SDC\0", false);
        let data = b"XXXXHTTP/1.1 200 OK\r\n";
        let mut cursor = &data[..];
        h.read_response_head(&mut cursor).await.unwrap();
        assert!(cursor.starts_with(b"HTTP/1.1"));
    }

    #[tokio::test]
    async fn request_and_response_prefixes_are_independent() {
        let h = header(b"REQ", b"RESPONSE", true);

        let mut buf = Vec::new();
        h.write_request_head(&mut buf).await.unwrap();
        assert_eq!(buf, b"REQ");

        let mut buf = Vec::new();
        h.write_response_head(&mut buf).await.unwrap();
        assert_eq!(buf, b"RESPONSE");
    }
}
