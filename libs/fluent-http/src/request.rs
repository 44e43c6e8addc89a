use crate::client::Client;
use crate::cookie::{self, Cookie};
use crate::error::{HttpError, InvalidUriKind};
use crate::multipart::MultipartWriter;
use crate::proxy;
use crate::redirect::RedirectLimit;
use crate::response::HttpResponse;
use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate";

/// Expand a media type shorthand (`json`, `form`, ...) to its full form.
///
/// Anything that is not a known shorthand is returned unchanged.
fn media_type(value: &str) -> String {
    let full = match value.trim().to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "json" => JSON,
        "xml" => "application/xml",
        "text" => "text/plain",
        "urlencoded" | "form" | "form-data" => FORM_URLENCODED,
        "multipart" => "multipart/form-data",
        _ => return value.to_owned(),
    };
    full.to_owned()
}

/// HTTP request builder with fluent API
///
/// Created by the crate-level verb functions ([`get`](crate::get),
/// [`post`](crate::post), ...) which use the global client, or by the same
/// methods on a [`Client`].
///
/// Configuration methods never fail on the spot: the first error is recorded
/// and every later configuration call becomes a no-op. The error surfaces
/// from [`request`](Self::request), [`execute`](Self::execute) or any of the
/// body terminals, and is never cleared.
///
/// # Body sources
///
/// A request carries one raw body ([`body`](Self::body),
/// [`json`](Self::json), [`body_bytes`](Self::body_bytes)), or form fields
/// ([`add_form_fields`](Self::add_form_fields)), or file attachments
/// ([`attach_file`](Self::attach_file)). Attachments and form fields combine
/// into a `multipart/form-data` body; a raw body conflicts with both and
/// fails with [`HttpError::BodyAlreadySet`].
///
/// # Example
///
/// ```ignore
/// let mut request = fluent_http::post("https://api.example.com/upload")
///     .query_param("dry_run", "false")
///     .basic_auth("user", "secret")
///     .add_form_fields([("title", "report")])
///     .attach_file("file", "./report.pdf", "");
///
/// let response = request.execute()?;
/// println!("{} {}", response.status(), response.text()?);
/// ```
///
/// # Repeated execution
///
/// The request is assembled and dispatched at most once. A second
/// [`execute`](Self::execute) returns the same response (or the same error)
/// without touching the network.
#[must_use = "RequestBuilder does nothing until it is executed"]
pub struct RequestBuilder {
    /// `None` resolves to [`Client::global`] when the request is assembled
    client: Option<Client>,
    method: Option<Method>,
    url: Option<Url>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    multipart: MultipartWriter,
    raw_body: Option<Bytes>,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    basic_auth: Option<(String, String)>,
    timeout: Option<Duration>,
    max_redirects: Option<usize>,
    /// First error captured during building (deferred to execution)
    error: Option<HttpError>,
    assembled: Option<Request<Bytes>>,
    outcome: Option<Result<HttpResponse, HttpError>>,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("error", &self.error)
            .field("executed", &self.outcome.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Create an empty request on the global client
    ///
    /// Set the method and URL with [`to`](Self::to).
    pub fn new() -> Self {
        Self::blank(None)
    }

    pub(crate) fn with_client(client: Client) -> Self {
        Self::blank(Some(client))
    }

    fn blank(client: Option<Client>) -> Self {
        Self {
            client,
            method: None,
            url: None,
            query: Vec::new(),
            form: Vec::new(),
            multipart: MultipartWriter::new(),
            raw_body: None,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            basic_auth: None,
            timeout: None,
            max_redirects: None,
            error: None,
            assembled: None,
            outcome: None,
        }
    }

    /// Set the method and URL
    ///
    /// The method is case-insensitive. The URL must be absolute with an
    /// `http` or `https` scheme; its existing query is kept and the pairs
    /// added through [`query`](Self::query) are appended to it. An empty
    /// method or URL leaves that part unset.
    pub fn to(mut self, method: &str, url: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        let method = method.trim();
        if !method.is_empty() {
            match Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
                Ok(method) => self.method = Some(method),
                Err(_) => {
                    self.error = Some(HttpError::InvalidMethod(method.to_owned()));
                    return self;
                }
            }
        }

        let url = url.trim();
        if !url.is_empty() {
            match parse_url(url) {
                Ok(url) => self.url = Some(url),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    /// Append query pairs; repeated keys are all kept, in order
    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        if self.error.is_some() {
            return self;
        }
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Append a single query pair
    pub fn query_param(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query([(key, value)])
    }

    /// Set a header, replacing any existing values
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Add a header value, keeping existing values
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Replace all headers
    pub fn set_headers(mut self, headers: HeaderMap) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.headers = headers;
        self
    }

    /// Add multiple headers, keeping existing values
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = fluent_http::get("https://api.example.com")
    ///     .headers([("x-request-id", "abc123"), ("x-tenant", "acme")]);
    /// ```
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.add_header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Set `Content-Type`
    ///
    /// Accepts the shorthands `html`, `json`, `xml`, `text`, `urlencoded`,
    /// `form`, `form-data` and `multipart`; anything else is used as given.
    pub fn content_type(self, content_type: &str) -> Self {
        let value = media_type(content_type);
        self.set_header(CONTENT_TYPE.as_str(), &value)
    }

    /// Set `Accept`; takes the same shorthands as [`content_type`](Self::content_type)
    pub fn accept(self, accept: &str) -> Self {
        let value = media_type(accept);
        self.set_header(ACCEPT.as_str(), &value)
    }

    /// Authenticate with HTTP Basic credentials
    ///
    /// Overrides any `Authorization` header set on the builder.
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Add a cookie to the `Cookie` header
    pub fn add_cookie(mut self, cookie: impl Into<Cookie>) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.cookies.push(cookie.into());
        self
    }

    /// Add several cookies, in order
    pub fn cookies<C: Into<Cookie>>(mut self, cookies: impl IntoIterator<Item = C>) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.cookies.extend(cookies.into_iter().map(Into::into));
        self
    }

    /// Override the client timeout for this request
    ///
    /// Covers dispatch, redirects and reading the response body.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.timeout = Some(timeout);
        self
    }

    /// Override the client redirect limit for this request; `0` disables following
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Set the body verbatim
    ///
    /// Sets `Content-Type: application/json` unless a content type is
    /// already set.
    pub fn body(self, body: impl Into<String>) -> Self {
        self.set_raw_body(Bytes::from(body.into()), true)
    }

    /// Serialize `value` as the JSON body
    ///
    /// Sets `Content-Type: application/json` unless a content type is
    /// already set. Serialization failure is deferred as [`HttpError::Json`].
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_json::to_vec(value) {
            Ok(body) => self.set_raw_body(Bytes::from(body), true),
            Err(e) => {
                self.error = Some(e.into());
                self
            }
        }
    }

    /// Set the body as raw bytes; no content type is implied
    pub fn body_bytes(self, body: impl Into<Bytes>) -> Self {
        self.set_raw_body(body.into(), false)
    }

    /// Add URL-encoded form fields; repeated calls accumulate
    ///
    /// Sets `Content-Type: application/x-www-form-urlencoded`. When files are
    /// attached too, the fields are sent as text parts of the multipart body.
    pub fn add_form_fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        if self.error.is_some() {
            return self;
        }
        if self.raw_body.is_some() {
            self.error = Some(HttpError::BodyAlreadySet);
            return self;
        }
        let before = self.form.len();
        self.form
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        if self.form.len() > before {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
        }
        self
    }

    /// Attach a local file as a multipart part
    ///
    /// The file is read immediately. `remote_name` is the file name sent to
    /// the server; when empty, the local file name is used. The part's
    /// content type is guessed from `remote_name`.
    pub fn attach_file(
        mut self,
        field: &str,
        path: impl AsRef<Path>,
        remote_name: &str,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.raw_body.is_some() {
            self.error = Some(HttpError::BodyAlreadySet);
            return self;
        }

        let path = path.as_ref();
        let remote_name = if remote_name.is_empty() {
            path.file_name()
                .map_or_else(String::new, |name| name.to_string_lossy().into_owned())
        } else {
            remote_name.to_owned()
        };

        let written = std::fs::File::open(path)
            .and_then(|mut file| self.multipart.write_file(field, &remote_name, &mut file));
        if let Err(e) = written {
            self.error = Some(HttpError::io(path.display().to_string(), e));
        }
        self
    }

    /// Attach in-memory content as a multipart part
    pub fn attach_bytes(
        mut self,
        field: &str,
        remote_name: &str,
        data: impl AsRef<[u8]>,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.raw_body.is_some() {
            self.error = Some(HttpError::BodyAlreadySet);
            return self;
        }
        self.multipart.write_bytes(field, remote_name, data.as_ref());
        self
    }

    /// The error recorded while building, if any
    #[must_use]
    pub fn deferred_error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    /// Assemble the request without sending it.
    ///
    /// Repeated calls return the same request.
    ///
    /// # Errors
    ///
    /// - `HttpError::LackUrl` / `HttpError::LackMethod` when either is unset
    /// - any error recorded while building
    /// - `HttpError::FormEncode` if the form fields cannot be encoded
    pub fn request(&mut self) -> Result<Request<Bytes>, HttpError> {
        self.check()?;

        if let Some(request) = &self.assembled {
            return Ok(clone_request(request));
        }

        let request = self
            .assemble()
            .inspect_err(|e| self.error = Some(e.clone()))?;
        let copy = clone_request(&request);
        self.assembled = Some(request);
        Ok(copy)
    }

    /// Send the request and return the response
    ///
    /// The first call dispatches; later calls return the memoized response
    /// or error.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if:
    /// - Request building failed (missing URL or method, invalid headers, body conflict, ...)
    /// - Network/transport error
    /// - Request timeout
    pub fn execute(&mut self) -> Result<&mut HttpResponse, HttpError> {
        self.check()?;
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.dispatch(),
        };
        self.outcome.insert(outcome).as_mut().map_err(|e| e.clone())
    }

    /// Send the request and take ownership of the response
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute)
    pub fn send(mut self) -> Result<HttpResponse, HttpError> {
        self.check()?;
        match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.dispatch(),
        }
    }

    /// Execute and return the response body as text
    ///
    /// # Errors
    ///
    /// Any [`execute`](Self::execute) error, or [`HttpResponse::text`] errors
    pub fn text(&mut self) -> Result<String, HttpError> {
        self.execute()?.text()
    }

    /// Execute and parse the response body as JSON
    ///
    /// # Errors
    ///
    /// Any [`execute`](Self::execute) error, or [`HttpResponse::json`] errors
    pub fn json_response<T: DeserializeOwned>(&mut self) -> Result<T, HttpError> {
        self.execute()?.json()
    }

    /// Execute and parse the response body as a JSON object
    ///
    /// # Errors
    ///
    /// Any [`execute`](Self::execute) error, or [`HttpResponse::json`] errors
    pub fn json_map(&mut self) -> Result<serde_json::Map<String, serde_json::Value>, HttpError> {
        self.execute()?.json_map()
    }

    /// Execute and return the decoded response body
    ///
    /// # Errors
    ///
    /// Any [`execute`](Self::execute) error, or [`HttpResponse::bytes`] errors
    pub fn bytes(&mut self) -> Result<Bytes, HttpError> {
        self.execute()?.bytes()
    }

    /// Execute and save the decoded response body into `dir`
    ///
    /// # Errors
    ///
    /// Any [`execute`](Self::execute) error, or [`HttpResponse::to_file`] errors
    pub fn to_file(
        &mut self,
        dir: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<PathBuf, HttpError> {
        self.execute()?.to_file(dir, name)
    }

    fn set_raw_body(mut self, body: Bytes, json_default: bool) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.raw_body.is_some() || !self.form.is_empty() || !self.multipart.is_empty() {
            self.error = Some(HttpError::BodyAlreadySet);
            return self;
        }
        if json_default && !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        }
        self.raw_body = Some(body);
        self
    }

    /// URL and method are reported first; a URL that was given but rejected
    /// reports its own error instead of `LackUrl`.
    fn check(&self) -> Result<(), HttpError> {
        if self.url.is_none() {
            return Err(match &self.error {
                Some(e @ (HttpError::InvalidUri { .. } | HttpError::InvalidScheme { .. })) => {
                    e.clone()
                }
                _ => HttpError::LackUrl,
            });
        }
        if self.method.is_none() {
            return Err(match &self.error {
                Some(e @ HttpError::InvalidMethod(_)) => e.clone(),
                _ => HttpError::LackMethod,
            });
        }
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn resolve_client(&mut self) -> Result<Client, HttpError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = Client::global()?;
        self.client = Some(client.clone());
        Ok(client)
    }

    fn assemble(&mut self) -> Result<Request<Bytes>, HttpError> {
        let client = self.resolve_client()?;
        let settings = client.settings();

        let (Some(method), Some(mut url)) = (self.method.clone(), self.url.clone()) else {
            return Err(HttpError::LackUrl);
        };
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }

        let mut headers = self.headers.clone();
        let body = self.assemble_body(&mut headers)?;

        if !headers.contains_key(USER_AGENT) && !settings.user_agent.is_empty() {
            headers.insert(USER_AGENT, HeaderValue::try_from(settings.user_agent.as_str())?);
        }
        if !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(
                ACCEPT_ENCODING,
                HeaderValue::from_static(DEFAULT_ACCEPT_ENCODING),
            );
        }
        if let Some((user, password)) = &self.basic_auth {
            headers.insert(AUTHORIZATION, proxy::basic_auth_value(user, password)?);
        }
        if let Some(cookies) = cookie::header_value(&self.cookies) {
            let mut merged: Vec<&str> = headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .collect();
            merged.push(&cookies);
            let value = HeaderValue::try_from(merged.join("; "))?;
            headers.insert(COOKIE, value);
        }

        let uri: http::Uri =
            url.as_str()
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: url.to_string(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = settings.protocol.as_http_version();
        *request.headers_mut() = headers;

        tracing::trace!(
            method = %request.method(),
            url = %url,
            body_len = request.body().len(),
            "assembled request"
        );
        Ok(request)
    }

    /// Body by priority: multipart, then form fields, then the raw body.
    fn assemble_body(&mut self, headers: &mut HeaderMap) -> Result<Bytes, HttpError> {
        if !self.multipart.is_empty() {
            for (name, value) in &self.form {
                self.multipart.write_field(name, value);
            }
            self.multipart.close();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::try_from(self.multipart.content_type())?,
            );
            return Ok(self.multipart.to_bytes());
        }

        if !self.form.is_empty() && self.raw_body.is_none() {
            return Ok(Bytes::from(serde_urlencoded::to_string(&self.form)?));
        }

        Ok(self.raw_body.clone().unwrap_or_default())
    }

    fn dispatch(&mut self) -> Result<HttpResponse, HttpError> {
        let request = self.request()?;
        let client = self.resolve_client()?;
        let timeout = self.timeout.unwrap_or(client.settings().timeout);

        let url = Url::parse(&request.uri().to_string()).map_err(|e| HttpError::InvalidUri {
            url: request.uri().to_string(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

        let (parts, body) = request.into_parts();
        let mut request = Request::from_parts(parts, Full::new(body));
        if let Some(limit) = self.max_redirects {
            request.extensions_mut().insert(RedirectLimit(limit));
        }

        client.send(request, url, timeout)
    }
}

fn parse_url(raw: &str) -> Result<Url, HttpError> {
    let url = Url::parse(raw).map_err(|e| {
        let kind = match e {
            url::ParseError::RelativeUrlWithoutBase => InvalidUriKind::MissingScheme,
            url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
            _ => InvalidUriKind::ParseError,
        };
        HttpError::InvalidUri {
            url: raw.to_owned(),
            kind,
            reason: e.to_string(),
        }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            });
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(HttpError::InvalidUri {
            url: raw.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    Ok(url)
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    let name = HeaderName::try_from(name)?;
    let value = HeaderValue::try_from(value)?;
    Ok((name, value))
}

fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut copy = Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}
