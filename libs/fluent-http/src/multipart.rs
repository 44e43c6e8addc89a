//! `multipart/form-data` body writer.
//!
//! Parts are written straight into an in-memory buffer as they are added;
//! [`MultipartWriter::close`] appends the terminating boundary.

use bytes::Bytes;
use rand::Rng;
use std::io::{self, Read};

const DEFAULT_PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Incrementally built multipart body.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
    buf: Vec<u8>,
    parts: usize,
    closed: bool,
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartWriter {
    /// Create an empty writer with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(gen_boundary())
    }

    /// Create an empty writer with a fixed boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buf: Vec::new(),
            parts: 0,
            closed: false,
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `true` until the first part is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The `Content-Type` header value announcing this body's boundary.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Write a plain text field.
    pub fn write_field(&mut self, name: &str, value: &str) {
        self.write_part_header(name, None, None);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self.parts += 1;
    }

    /// Write a file part, streaming its bytes from `reader`.
    ///
    /// The part's `Content-Type` is guessed from `filename`.
    ///
    /// # Errors
    /// Returns the reader's I/O error. The partially written part is
    /// discarded, leaving the body as it was before the call.
    pub fn write_file<R: Read>(
        &mut self,
        field: &str,
        filename: &str,
        reader: &mut R,
    ) -> io::Result<()> {
        let mark = self.buf.len();
        let mime = guess_part_type(filename);
        self.write_part_header(field, Some(filename), Some(&mime));

        if let Err(e) = io::copy(reader, &mut self.buf) {
            self.buf.truncate(mark);
            return Err(e);
        }

        self.buf.extend_from_slice(b"\r\n");
        self.parts += 1;
        Ok(())
    }

    /// Write a file part from memory.
    pub fn write_bytes(&mut self, field: &str, filename: &str, data: &[u8]) {
        let mime = guess_part_type(filename);
        self.write_part_header(field, Some(filename), Some(&mime));
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self.parts += 1;
    }

    /// Append the closing boundary. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.buf.extend_from_slice(b"--");
        self.buf.extend_from_slice(self.boundary.as_bytes());
        self.buf.extend_from_slice(b"--\r\n");
        self.closed = true;
    }

    /// Body written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    fn write_part_header(&mut self, name: &str, filename: Option<&str>, mime: Option<&str>) {
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary,
            escape_quoted(name)
        );
        if let Some(filename) = filename {
            header.push_str("; filename=\"");
            header.push_str(&escape_quoted(filename));
            header.push('"');
        }
        header.push_str("\r\n");
        if let Some(mime) = mime {
            header.push_str("Content-Type: ");
            header.push_str(mime);
            header.push_str("\r\n");
        }
        header.push_str("\r\n");
        self.buf.extend_from_slice(header.as_bytes());
    }
}

fn gen_boundary() -> String {
    let mut rng = rand::rng();
    format!(
        "{:016x}{:016x}{:016x}",
        rng.random::<u64>(),
        rng.random::<u64>(),
        rng.random::<u64>()
    )
}

fn guess_part_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
        .to_owned()
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
