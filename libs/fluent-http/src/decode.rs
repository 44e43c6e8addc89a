//! Response content decoding.
//!
//! `gzip`/`x-gzip` bodies are read as (possibly multi-member) gzip, `deflate`
//! bodies as raw deflate. Many servers send zlib-wrapped data labelled
//! `deflate`, so a failed decode is retried once as zlib before giving up.
//! Any other encoding is passed through untouched.

use crate::error::HttpError;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use std::io::{self, Read};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Gzip,
    Deflate,
}

impl Codec {
    fn from_header(encoding: &str) -> Option<Self> {
        if encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip") {
            Some(Codec::Gzip)
        } else if encoding.eq_ignore_ascii_case("deflate") {
            Some(Codec::Deflate)
        } else {
            None
        }
    }
}

enum Failure {
    Io(io::Error),
    TooLarge { limit: usize, actual: usize },
}

impl Failure {
    fn into_http_error(self, encoding: &str) -> HttpError {
        match self {
            Failure::Io(source) => HttpError::Decode {
                encoding: encoding.to_owned(),
                source: Arc::new(source),
            },
            Failure::TooLarge { limit, actual } => HttpError::BodyTooLarge { limit, actual },
        }
    }
}

/// Decode `raw` according to a `Content-Encoding` header value.
///
/// `limit` bounds the decoded size.
///
/// # Errors
/// `HttpError::Decode` when neither the declared codec nor the zlib fallback
/// can read the body, `HttpError::BodyTooLarge` when the decoded output
/// exceeds `limit`.
pub fn decode_content(
    encoding: Option<&str>,
    raw: &Bytes,
    limit: Option<usize>,
) -> Result<Bytes, HttpError> {
    let Some(encoding) = encoding.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(raw.clone());
    };

    let Some(codec) = Codec::from_header(encoding) else {
        tracing::trace!(encoding, "unknown content encoding, passing body through");
        return Ok(raw.clone());
    };

    if raw.is_empty() {
        return Ok(Bytes::new());
    }

    let primary = match codec {
        Codec::Gzip => read_limited(MultiGzDecoder::new(raw.as_ref()), limit),
        Codec::Deflate => read_limited(DeflateDecoder::new(raw.as_ref()), limit),
    };

    let primary_err = match primary {
        Ok(decoded) => return Ok(decoded),
        Err(Failure::Io(e)) => e,
        Err(too_large @ Failure::TooLarge { .. }) => {
            return Err(too_large.into_http_error(encoding));
        }
    };

    tracing::debug!(encoding, error = %primary_err, "content decoding failed, retrying as zlib");

    match read_limited(ZlibDecoder::new(raw.as_ref()), limit) {
        Ok(decoded) => Ok(decoded),
        Err(Failure::Io(fallback_err)) => {
            tracing::debug!(encoding, error = %fallback_err, "zlib fallback failed");
            Err(Failure::Io(primary_err).into_http_error(encoding))
        }
        Err(too_large @ Failure::TooLarge { .. }) => Err(too_large.into_http_error(encoding)),
    }
}

fn read_limited<R: Read>(reader: R, limit: Option<usize>) -> Result<Bytes, Failure> {
    let mut out = Vec::new();
    match limit {
        None => {
            let mut reader = reader;
            reader.read_to_end(&mut out).map_err(Failure::Io)?;
        }
        Some(limit) => {
            let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
            reader
                .take(cap)
                .read_to_end(&mut out)
                .map_err(Failure::Io)?;
            if out.len() > limit {
                return Err(Failure::TooLarge {
                    limit,
                    actual: out.len(),
                });
            }
        }
    }
    Ok(Bytes::from(out))
}
