//! `multipart/form-data` bodies.
//!
//! Encoding is done by hand (the format is trivial to produce); decoding is
//! delegated to `multer`.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream;
use rand::RngCore;

use crate::error::HttpConnError;

/// One form field or file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// An ordered list of form parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub parts: Vec<Part>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        });
        self
    }

    /// First part named `name`.
    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Text value of the first non-file part named `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|p| p.name == name && p.file_name.is_none())
            .and_then(|p| std::str::from_utf8(&p.data).ok())
    }

    pub fn files(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.file_name.is_some())
    }

    pub(crate) fn encode(&self, boundary: &str) -> Bytes {
        let mut out = BytesMut::new();
        for part in &self.parts {
            out.put_slice(format!("--{boundary}\r\n").as_bytes());
            let mut disposition = format!(
                "Content-Disposition: form-data; name=\"{}\"",
                escape_quotes(&part.name)
            );
            if let Some(file_name) = &part.file_name {
                disposition.push_str(&format!("; filename=\"{}\"", escape_quotes(file_name)));
            }
            out.put_slice(disposition.as_bytes());
            out.put_slice(b"\r\n");
            if let Some(content_type) = &part.content_type {
                out.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            out.put_slice(b"\r\n");
            out.put_slice(&part.data);
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("--{boundary}--\r\n").as_bytes());
        out.freeze()
    }

    /// Decodes a complete body. `content_type` must be `multipart/form-data`
    /// with a boundary; `max_size` bounds the whole body.
    pub(crate) async fn decode(
        content_type: &str,
        body: Bytes,
        max_size: usize,
    ) -> Result<Self, HttpConnError> {
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| HttpConnError::Decode(format!("invalid Content-Type {content_type:?}: {e}")))?;
        if body.len() > max_size {
            return Err(HttpConnError::Decode(format!(
                "multipart body of {} bytes exceeds limit of {max_size}",
                body.len()
            )));
        }

        let source = stream::once(async move { Ok::<Bytes, std::convert::Infallible>(body) });
        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(max_size as u64));
        let mut multipart = multer::Multipart::with_constraints(source, boundary, constraints);

        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(|m| m.to_string());
            let data = field.bytes().await?;
            form.parts.push(Part {
                name,
                file_name,
                content_type,
                data,
            });
        }
        Ok(form)
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Random 32-hex-digit boundary.
pub(crate) fn generate_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
