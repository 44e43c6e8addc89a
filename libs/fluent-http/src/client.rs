use crate::builder::ClientBuilder;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::{HttpResponse, ResponseBody};
use crate::settings::{self, Settings};
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::Full;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;
use tower::util::BoxCloneService;
use url::Url;

/// Type-erased transport: the redirect middleware over the connection pool.
pub type TransportService =
    BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

static GLOBAL_CLIENT: OnceLock<Result<Client, HttpError>> = OnceLock::new();

/// Blocking HTTP client.
///
/// A `Client` is built once from a [`Settings`] value (see [`ClientBuilder`])
/// and never changes afterwards: its proxy connector, TLS roots and redirect
/// policy are fixed. It owns a current-thread tokio runtime that drives the
/// transport while [`RequestBuilder::execute`] or a body accessor blocks the
/// calling thread.
///
/// # Thread Safety
///
/// `Client` is `Clone + Send + Sync`; clones share the connection pool and
/// the runtime.
///
/// # Async contexts
///
/// Blocking calls made from inside a tokio runtime fail with
/// [`HttpError::Runtime`]. The last clone of a `Client` must also be dropped
/// outside of any async context.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder()
///     .user_agent("my-app/1.0")
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let body = client.get("https://example.com/api").text()?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    service: Mutex<TransportService>,
    runtime: tokio::runtime::Runtime,
    settings: Settings,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with default settings
    ///
    /// # Errors
    /// Returns an error if TLS initialization or runtime creation fails
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build()
    }

    /// Create a client from the given settings
    ///
    /// # Errors
    /// Returns an error if the proxy URL is invalid, or TLS initialization
    /// or runtime creation fails
    pub fn with_settings(settings: Settings) -> Result<Self, HttpError> {
        ClientBuilder::with_settings(settings).build()
    }

    /// Create a builder for configuring the client
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The process-wide client used by the facade functions.
    ///
    /// Built on first use from [`settings::global`]. A construction failure
    /// is remembered and returned on every call.
    ///
    /// # Errors
    /// Returns the error that building the global client produced
    pub fn global() -> Result<Self, HttpError> {
        GLOBAL_CLIENT
            .get_or_init(|| {
                tracing::debug!("building global HTTP client");
                Client::with_settings(settings::global().clone())
            })
            .clone()
    }

    pub(crate) fn from_parts(
        service: TransportService,
        runtime: tokio::runtime::Runtime,
        settings: Settings,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                service: Mutex::new(service),
                runtime,
                settings,
            }),
        }
    }

    /// Settings this client was built with
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Start a request with the given method
    ///
    /// The URL must be absolute with an `http` or `https` scheme; a bad URL
    /// is reported when the request is executed.
    #[must_use]
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::with_client(self.clone()).to(method.as_str(), url)
    }

    /// Start a request with no method or URL yet; set them with
    /// [`RequestBuilder::to`].
    #[must_use]
    pub fn new_request(&self) -> RequestBuilder {
        RequestBuilder::with_client(self.clone())
    }

    /// Create a GET request builder
    #[must_use]
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder
    #[must_use]
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder
    #[must_use]
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a DELETE request builder
    #[must_use]
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Create a PATCH request builder
    #[must_use]
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a HEAD request builder
    #[must_use]
    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Create an OPTIONS request builder
    #[must_use]
    pub fn options(&self, url: &str) -> RequestBuilder {
        self.request(Method::OPTIONS, url)
    }

    /// Run `future` to completion on the client's runtime.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> Result<F::Output, HttpError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(HttpError::Runtime(Arc::new(std::io::Error::other(
                "blocking HTTP call made from inside an async runtime",
            ))));
        }
        Ok(self.inner.runtime.block_on(future))
    }

    /// Dispatch an assembled request; the deadline also bounds the body read.
    pub(crate) fn send(
        &self,
        request: Request<Full<Bytes>>,
        url: Url,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let service = self.inner.service.lock().clone();
        let deadline = Instant::now().checked_add(timeout);

        tracing::debug!(method = %request.method(), url = %url, ?timeout, "sending request");

        let outcome = self.block_on(within(deadline, timeout, service.oneshot(request)))?;
        let response = outcome??;

        tracing::debug!(
            status = response.status().as_u16(),
            url = %url,
            "received response"
        );

        Ok(HttpResponse::new(
            response,
            url,
            self.clone(),
            deadline,
            timeout,
        ))
    }
}

/// Await `future`, failing with [`HttpError::Timeout`] once `deadline` passes.
pub(crate) async fn within<F: Future>(
    deadline: Option<Instant>,
    timeout: Duration,
    future: F,
) -> Result<F::Output, HttpError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| HttpError::Timeout(timeout)),
        None => Ok(future.await),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::settings::RedirectConfig;
    use http::Method;
    use httpmock::Method::HEAD;
    use httpmock::prelude::*;

    fn test_client() -> Client {
        Client::with_settings(Settings::for_testing()).unwrap()
    }

    #[test]
    fn test_client_get() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/test");
            then.status(200).body("hello");
        });

        let client = test_client();
        let text = client.get(&server.url("/test")).text().unwrap();

        assert_eq!(text, "hello");
        mock.assert();
    }

    #[test]
    fn test_client_verbs() {
        let server = MockServer::start();
        let client = test_client();

        for (method, verb) in [
            (POST, Method::POST),
            (PUT, Method::PUT),
            (PATCH, Method::PATCH),
            (DELETE, Method::DELETE),
            (OPTIONS, Method::OPTIONS),
        ] {
            let path = format!("/{}", verb.as_str().to_ascii_lowercase());
            let mock = server.mock(|when, then| {
                when.method(method).path(path.as_str());
                then.status(204);
            });

            let mut request = client.request(verb, &server.url(&path));
            let response = request.execute().unwrap();
            assert_eq!(response.status(), http::StatusCode::NO_CONTENT);
            mock.assert();
        }
    }

    #[test]
    fn test_head_request_has_empty_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(HEAD).path("/head");
            then.status(200).header("content-length", "42");
        });

        let client = test_client();
        let mut request = client.head(&server.url("/head"));
        let response = request.execute().unwrap();
        assert!(response.bytes().unwrap().is_empty());
    }

    #[test]
    fn test_custom_user_agent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/ua")
                .header("user-agent", "custom-agent/2.0");
            then.status(200);
        });

        let client = Client::with_settings(
            Settings::for_testing().with_user_agent("custom-agent/2.0"),
        )
        .unwrap();
        let mut request = client.get(&server.url("/ua"));
        request.execute().unwrap();
        mock.assert();
    }

    #[test]
    fn test_follows_redirects() {
        let server = MockServer::start();
        let _redirect = server.mock(|when, then| {
            when.method(GET).path("/old");
            then.status(302).header("location", "/new");
        });
        let _target = server.mock(|when, then| {
            when.method(GET).path("/new");
            then.status(200).body("moved here");
        });

        let client = test_client();
        let mut request = client.get(&server.url("/old"));
        let response = request.execute().unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.url().path(), "/new");
        assert_eq!(response.text().unwrap(), "moved here");
    }

    #[test]
    fn test_redirects_disabled_returns_3xx() {
        let server = MockServer::start();
        let _redirect = server.mock(|when, then| {
            when.method(GET).path("/old");
            then.status(301).header("location", "/new");
        });

        let client = ClientBuilder::with_settings(Settings::for_testing())
            .redirect(RedirectConfig::disabled())
            .build()
            .unwrap();
        let mut request = client.get(&server.url("/old"));
        let response = request.execute().unwrap();

        assert_eq!(response.status(), http::StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.url().path(), "/old");
        assert_eq!(response.final_url().unwrap().path(), "/new");
    }

    #[test]
    fn test_per_request_redirect_limit() {
        let server = MockServer::start();
        let _a = server.mock(|when, then| {
            when.method(GET).path("/a");
            then.status(302).header("location", "/b");
        });
        let _b = server.mock(|when, then| {
            when.method(GET).path("/b");
            then.status(302).header("location", "/c");
        });
        let c = server.mock(|when, then| {
            when.method(GET).path("/c");
            then.status(200);
        });

        let client = test_client();
        let mut request = client.get(&server.url("/a")).max_redirects(1);
        let response = request.execute().unwrap();

        assert_eq!(response.status(), http::StatusCode::FOUND);
        assert_eq!(response.url().path(), "/b");
        assert_eq!(c.calls(), 0);
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let client = test_client();
        // Port 9 (discard) is not expected to be listening in test environments
        let err = client.get("http://127.0.0.1:9/").text().unwrap_err();
        assert!(
            matches!(err, HttpError::Transport(_) | HttpError::Timeout(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn test_blocking_inside_runtime_is_rejected() {
        let client = test_client();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let result = runtime.block_on(async { client.block_on(async { 1 }) });
        assert!(matches!(result, Err(HttpError::Runtime(_))));
    }

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<Client>();
    }

    #[test]
    fn test_global_client_is_shared() {
        let a = Client::global().unwrap();
        let b = Client::global().unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[tokio::test]
    async fn test_within_reports_configured_timeout() {
        let deadline = Instant::now().checked_add(Duration::from_millis(10));
        let err = within(
            deadline,
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HttpError::Timeout(d) if d == Duration::from_millis(10)));
    }
}
