use crate::client::{Client, TransportService};
use crate::error::HttpError;
use crate::proxy::ProxyConnector;
use crate::redirect::RedirectPolicy;
use crate::response::ResponseBody;
use crate::settings::{ProtocolVersion, ProxyConfig, RedirectConfig, Settings, TlsRootConfig};
use crate::tls;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client as PoolClient;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::follow_redirect::FollowRedirectLayer;

/// Builder for constructing a [`Client`].
///
/// Starts from [`Settings::default`]; every setter overrides one field.
pub struct ClientBuilder {
    settings: Settings,
    transport: Option<TransportService>,
}

impl ClientBuilder {
    /// Create a new builder with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Create a builder from existing settings
    #[must_use]
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            transport: None,
        }
    }

    /// Set the default request timeout
    ///
    /// Covers dispatch, redirects and reading the response body. Individual
    /// requests may override it.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.settings.user_agent = user_agent.into();
        self
    }

    /// Set the protocol version for outgoing requests
    ///
    /// `HTTP/2` makes the connection pool speak HTTP/2 only.
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.settings.protocol = protocol;
        self
    }

    /// Set the proxy configuration
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.settings.proxy = proxy;
        self
    }

    /// Set the maximum number of redirects to follow
    ///
    /// Set to `0` to disable redirect following (3xx responses pass through as-is).
    /// Default: 10
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.settings.redirect.max_redirects = max_redirects;
        self
    }

    /// Disable redirect following
    #[must_use]
    pub fn no_redirects(mut self) -> Self {
        self.settings.redirect = RedirectConfig::disabled();
        self
    }

    /// Set the redirect policy configuration
    #[must_use]
    pub fn redirect(mut self, config: RedirectConfig) -> Self {
        self.settings.redirect = config;
        self
    }

    /// Set the TLS root certificate strategy
    #[must_use]
    pub fn tls_roots(mut self, tls_roots: TlsRootConfig) -> Self {
        self.settings.tls_roots = tls_roots;
        self
    }

    /// Set the maximum response body size, raw and decoded
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.settings.max_body_size = Some(size);
        self
    }

    /// Set the idle connection timeout for the connection pool
    ///
    /// Set to `None` to keep idle connections indefinitely.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per host
    ///
    /// Setting to `0` disables connection reuse entirely.
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.settings.pool_max_idle_per_host = max;
        self
    }

    /// Replace the connection pool with a custom service.
    ///
    /// The redirect policy still wraps the given service; proxy and TLS
    /// settings are ignored since no connector is built.
    #[must_use]
    pub fn transport<S>(mut self, service: S) -> Self
    where
        S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        self.transport = Some(TransportService::new(service));
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns an error if the proxy URL is invalid, TLS initialization fails
    /// or the runtime cannot be created
    pub fn build(self) -> Result<Client, HttpError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HttpError::Runtime(Arc::new(e)))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let _guard = runtime.enter();
                pool_transport(&self.settings)?
            }
        };

        // =======================================================================
        // Service stack (outer to inner):
        //   FollowRedirect(RedirectPolicy) → transport
        //
        // The transport is the hyper-util connection pool over
        //   HttpsConnector(ProxyConnector)
        // with forwarded-proxy credentials added per request,
        // unless replaced through `transport()`.
        // =======================================================================
        let policy = RedirectPolicy::new(self.settings.redirect.clone());
        let service = ServiceBuilder::new()
            .layer(FollowRedirectLayer::with_policy(policy))
            .service(transport)
            .boxed_clone();

        tracing::debug!(
            user_agent = %self.settings.user_agent,
            protocol = %self.settings.protocol,
            proxy = ?self.settings.proxy,
            "built HTTP client"
        );

        Ok(Client::from_parts(service, runtime, self.settings))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pooled hyper client over the proxy-aware TLS connector.
fn pool_transport(settings: &Settings) -> Result<TransportService, HttpError> {
    let connector = ProxyConnector::new(&settings.proxy, settings.tls_roots)?;
    let forwarding = connector.clone();
    let https = tls::https_connector(settings.tls_roots, connector)?;

    let mut builder = PoolClient::builder(TokioExecutor::new());
    // pool_timer is required for pool_idle_timeout to work
    builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .http2_only(settings.protocol.is_http2());
    if let Some(idle_timeout) = settings.pool_idle_timeout {
        builder.pool_idle_timeout(idle_timeout);
    }

    let pool = builder.build::<_, Full<Bytes>>(https);

    // Inside the redirect layer, so every hop gets its own proxy credentials
    let service = pool
        .map_request(move |request: Request<Full<Bytes>>| {
            forwarding.authorize_forwarded(request)
        })
        .map_response(box_response)
        .map_err(map_transport_error);

    Ok(TransportService::new(service))
}

fn box_response(response: Response<Incoming>) -> Response<ResponseBody> {
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Map a pool error to `HttpError`.
///
/// Errors raised by our own connector (such as an unsupported proxy scheme
/// read from the environment) travel through the pool boxed; they are
/// recovered from the source chain before falling back to `Transport`.
fn map_transport_error(err: hyper_util::client::legacy::Error) -> HttpError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(http_err) = cause.downcast_ref::<HttpError>() {
            return http_err.clone();
        }
        source = cause.source();
    }
    HttpError::from(err)
}
