use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, cloneable error source.
///
/// Errors are memoized by [`RequestBuilder`](crate::RequestBuilder) and
/// [`HttpResponse`](crate::HttpResponse) so that repeated terminal calls return
/// the same failure; sources are therefore held behind an `Arc`.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// HTTP client error types
///
/// Configuration and conflict errors raised while a request is being built
/// are held in the builder and only surface from the terminal call
/// (`request()`, `execute()`, `text()`, ...).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HttpError {
    /// The request has no URL
    #[error("request lacks URL")]
    LackUrl,

    /// The request has no method
    #[error("request lacks method")]
    LackMethod,

    /// A second body source was supplied after the first one
    #[error("request body has already been set")]
    BodyAlreadySet,

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(Arc<http::Error>),

    /// Invalid request method
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(Arc<http::header::InvalidHeaderName>),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(Arc<http::header::InvalidHeaderValue>),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme other than `http`/`https`
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Proxy address could not be parsed
    #[error("Invalid proxy URL '{url}': {reason}")]
    InvalidProxy { url: String, reason: String },

    /// Proxy address uses a scheme no proxy connector exists for
    #[error("Unsupported proxy scheme '{scheme}' (expected http, https, socks5 or socks5h)")]
    UnsupportedProxyScheme { scheme: String },

    /// Protocol version string is not one of `HTTP/1.0`, `HTTP/1.1`, `HTTP/2`
    #[error("Invalid protocol version: {0}")]
    InvalidProtocolVersion(String),

    /// Global settings were initialized after they had already been set or read
    #[error("global settings are already initialized")]
    SettingsAlreadyInitialized,

    /// Local file could not be read or written
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Request (including body transfer) timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, proxy, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] SharedError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] SharedError),

    /// The blocking runtime could not be created
    #[error("Runtime error: {0}")]
    Runtime(Arc<std::io::Error>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Body could not be decoded with the declared content encoding,
    /// nor with the zlib fallback
    #[error("Failed to decode '{encoding}' body: {source}")]
    Decode {
        encoding: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Response status is 400 or above.
    ///
    /// This is a soft error: `body` holds the decoded response text so the
    /// payload of an error response is never lost.
    #[error("status code is not ok: {status}")]
    StatusNotOk {
        status: http::StatusCode,
        body: String,
    },

    /// JSON was requested from a response that does not declare `application/json`
    #[error("unexpected content type '{content_type}': {message}")]
    ContentTypeMismatch {
        content_type: String,
        /// Response text, or the status reason when the body is empty
        message: String,
    },

    /// JSON (de)serialization error
    #[error("JSON parsing failed: {0}")]
    Json(Arc<serde_json::Error>),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
}

impl HttpError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        HttpError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Status code carried by [`HttpError::StatusNotOk`], if this is one.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            HttpError::StatusNotOk { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<http::Error> for HttpError {
    fn from(err: http::Error) -> Self {
        HttpError::RequestBuild(Arc::new(err))
    }
}

impl From<http::header::InvalidHeaderName> for HttpError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        HttpError::InvalidHeaderName(Arc::new(err))
    }
}

impl From<http::header::InvalidHeaderValue> for HttpError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        HttpError::InvalidHeaderValue(Arc::new(err))
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::Json(Arc::new(err))
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Arc::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Arc::new(err))
    }
}
