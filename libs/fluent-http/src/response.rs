use crate::client::{Client, within};
use crate::cookie::Cookie;
use crate::decode;
use crate::download;
use crate::error::HttpError;
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderMap, Response, StatusCode, Version};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower_http::follow_redirect::RequestUri;
use url::Url;

/// Type alias for the boxed response body produced by the transport.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// HTTP response with lazily read and decoded body.
///
/// The body stream is read at most once: the first call to any body
/// accessor buffers it ([`raw_bytes`](Self::raw_bytes)) and decodes it
/// according to `Content-Encoding` ([`content`](Self::content)). Both results,
/// including failures, are cached and returned by every later call.
///
/// Reading the body blocks on the owning client's runtime and is bounded by
/// the same deadline as the request that produced this response.
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    body: Option<ResponseBody>,
    raw: Option<Result<Bytes, HttpError>>,
    content: Option<Result<Bytes, HttpError>>,
    client: Client,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_read", &self.raw.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub(crate) fn new(
        response: Response<ResponseBody>,
        request_url: Url,
        client: Client,
        deadline: Option<Instant>,
        timeout: Duration,
    ) -> Self {
        let (parts, body) = response.into_parts();

        // Set by the redirect middleware to the URI of the last request made
        let url = parts
            .extensions
            .get::<RequestUri>()
            .and_then(|RequestUri(uri)| Url::parse(&uri.to_string()).ok())
            .unwrap_or(request_url);

        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            url,
            body: Some(body),
            raw: None,
            content: None,
            client,
            deadline,
            timeout,
        }
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the HTTP version of the response
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// URL of the request that produced this response, after any followed redirects
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `Content-Type` header value
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header_str(CONTENT_TYPE.as_str())
    }

    /// `Content-Length` header value, if present and numeric
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header_str(CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    /// Canonical reason phrase of the status code (empty when unknown)
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or_default()
    }

    /// `true` when the status code is below 400
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.as_u16() < 400
    }

    /// Cookies set by the response (`Set-Cookie` name/value pairs)
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(Cookie::parse_set_cookie)
            .collect()
    }

    /// `Location` header resolved against the response URL.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the header cannot be resolved to a URL
    pub fn location(&self) -> Result<Option<Url>, HttpError> {
        let Some(location) = self.header_str(LOCATION.as_str()) else {
            return Ok(None);
        };
        self.url
            .join(location)
            .map(Some)
            .map_err(|e| HttpError::InvalidUri {
                url: location.to_owned(),
                kind: crate::error::InvalidUriKind::ParseError,
                reason: e.to_string(),
            })
    }

    /// The URL this response points to.
    ///
    /// For an unfollowed redirect (301, 302, 303, 307, 308) this is the
    /// resolved `Location`; otherwise it is [`url`](Self::url).
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the `Location` header is malformed
    pub fn final_url(&self) -> Result<Url, HttpError> {
        let is_redirect = matches!(
            self.status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        );
        if is_redirect && let Some(location) = self.location()? {
            return Ok(location);
        }
        Ok(self.url.clone())
    }

    /// Raw body bytes as received, before any content decoding.
    ///
    /// # Errors
    /// Returns `HttpError::Transport` if reading the body fails,
    /// `HttpError::Timeout` if the request deadline passes, and
    /// `HttpError::BodyTooLarge` if the configured limit is exceeded
    pub fn raw_bytes(&mut self) -> Result<Bytes, HttpError> {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let raw = self.read_body();
        self.raw = Some(raw.clone());
        raw
    }

    /// Body decoded according to `Content-Encoding`.
    ///
    /// # Errors
    /// Returns any [`raw_bytes`](Self::raw_bytes) error, or `HttpError::Decode`
    /// when the body cannot be decoded
    pub fn content(&mut self) -> Result<Bytes, HttpError> {
        if let Some(content) = &self.content {
            return content.clone();
        }
        let content = self.raw_bytes().and_then(|raw| {
            let encoding = self.header_str(CONTENT_ENCODING.as_str());
            decode::decode_content(encoding, &raw, self.client.settings().max_body_size)
        });
        self.content = Some(content.clone());
        content
    }

    /// Decoded body; alias for [`content`](Self::content).
    ///
    /// # Errors
    /// Same as [`content`](Self::content)
    pub fn bytes(&mut self) -> Result<Bytes, HttpError> {
        self.content()
    }

    /// Decoded body as text (invalid UTF-8 is replaced).
    ///
    /// # Errors
    /// Returns `HttpError::StatusNotOk` carrying the text when the status is
    /// 400 or above, or any [`content`](Self::content) error
    pub fn text(&mut self) -> Result<String, HttpError> {
        let content = self.content()?;
        let text = String::from_utf8_lossy(&content).into_owned();
        if !self.is_ok() {
            return Err(HttpError::StatusNotOk {
                status: self.status,
                body: text,
            });
        }
        Ok(text)
    }

    /// Parse the decoded body as JSON.
    ///
    /// The body is parsed whatever the status; use
    /// [`json_with_status`](Self::json_with_status) to keep the parsed value
    /// of an error response.
    ///
    /// # Errors
    /// - `HttpError::ContentTypeMismatch` if `Content-Type` is not `application/json`
    /// - `HttpError::Json` if deserialization fails
    /// - `HttpError::StatusNotOk` carrying the body text when the status is 400 or above
    pub fn json<T: DeserializeOwned>(&mut self) -> Result<T, HttpError> {
        match self.json_with_status()? {
            (_, Some(status_err)) => Err(status_err),
            (value, None) => Ok(value),
        }
    }

    /// Parse the decoded body as JSON, returning the value together with the
    /// `StatusNotOk` error of a 400-or-above response.
    ///
    /// ```ignore
    /// let (problem, status_err) = response.json_with_status::<Problem>()?;
    /// if let Some(err) = status_err {
    ///     tracing::warn!(status = ?err.status(), detail = %problem.detail, "request rejected");
    /// }
    /// ```
    ///
    /// # Errors
    /// - `HttpError::ContentTypeMismatch` if `Content-Type` is not `application/json`
    /// - `HttpError::Json` if deserialization fails, whatever the status
    pub fn json_with_status<T: DeserializeOwned>(
        &mut self,
    ) -> Result<(T, Option<HttpError>), HttpError> {
        let content = self.content()?;

        let content_type = self.content_type().unwrap_or_default().trim().to_owned();
        if !content_type
            .to_ascii_lowercase()
            .starts_with("application/json")
        {
            let message = if content.is_empty() {
                format!("{} {}", self.status.as_u16(), self.reason())
                    .trim_end()
                    .to_owned()
            } else {
                String::from_utf8_lossy(&content).into_owned()
            };
            return Err(HttpError::ContentTypeMismatch {
                content_type,
                message,
            });
        }

        let value = serde_json::from_slice(&content)?;

        let status_err = (!self.is_ok()).then(|| HttpError::StatusNotOk {
            status: self.status,
            body: String::from_utf8_lossy(&content).into_owned(),
        });
        Ok((value, status_err))
    }

    /// Parse the decoded body as a JSON object.
    ///
    /// # Errors
    /// Same as [`json`](Self::json)
    pub fn json_map(&mut self) -> Result<serde_json::Map<String, serde_json::Value>, HttpError> {
        self.json()
    }

    /// Write the decoded body into `dir` and return the file path.
    ///
    /// Without an explicit `name`, the file name comes from
    /// `Content-Disposition`, or else from the last URL path segment (a
    /// timestamp when the path is empty) plus an extension for the
    /// `Content-Type`.
    ///
    /// # Errors
    /// Returns any [`content`](Self::content) error, or `HttpError::Io` if the
    /// file cannot be written
    pub fn to_file(
        &mut self,
        dir: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<PathBuf, HttpError> {
        let content = self.content()?;
        let name = download::file_name(name, &self.headers, &self.url);
        download::write(dir.as_ref(), &name, &content)
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn read_body(&mut self) -> Result<Bytes, HttpError> {
        let Some(body) = self.body.take() else {
            return Ok(Bytes::new());
        };
        let limit = self.client.settings().max_body_size;
        let read = collect_body(body, limit);
        let bytes = self
            .client
            .block_on(within(self.deadline, self.timeout, read))???;
        tracing::trace!(bytes = bytes.len(), url = %self.url, "read response body");
        Ok(bytes)
    }
}

async fn collect_body(mut body: ResponseBody, limit: Option<usize>) -> Result<Bytes, HttpError> {
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| HttpError::Transport(Arc::from(e)))?;
        if let Ok(data) = frame.into_data() {
            let total = buf.len() + data.len();
            if let Some(limit) = limit
                && total > limit
            {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: total,
                });
            }
            buf.extend_from_slice(&data);
        }
    }
    Ok(buf.freeze())
}
