//! Proxy-aware connector.
//!
//! Routes each connection either directly, through an HTTP(S) proxy, or
//! through a SOCKS5 proxy. An HTTP(S) proxy forwards plain `http://`
//! requests, which are then sent in absolute form, and tunnels `https://`
//! destinations with `CONNECT`. The proxy handshakes are hyper-util's; this
//! module only decides which one applies.

use crate::error::HttpError;
use crate::settings::{ProxyConfig, TlsRootConfig};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::PROXY_AUTHORIZATION;
use http::{HeaderValue, Request, Uri};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_rustls::{HttpsConnector, MaybeHttpsStream};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::client::legacy::connect::proxy::{SocksV5, Tunnel};
use hyper_util::client::proxy::matcher::{Intercept, Matcher};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::{Service, ServiceExt};
use url::Url;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stream produced by [`ProxyConnector`]: plain TCP, or TLS to an `https://` proxy.
///
/// A stream opened to a forwarding proxy reports itself as proxied, so the
/// connection pool writes request targets in absolute form.
pub struct ProxyStream {
    inner: MaybeHttpsStream<TokioIo<TcpStream>>,
    forwarding: bool,
}

impl ProxyStream {
    fn direct(inner: MaybeHttpsStream<TokioIo<TcpStream>>) -> Self {
        Self {
            inner,
            forwarding: false,
        }
    }

    fn forwarding(inner: MaybeHttpsStream<TokioIo<TcpStream>>) -> Self {
        Self {
            inner,
            forwarding: true,
        }
    }

    /// Whether requests on this stream go to a forwarding proxy
    #[must_use]
    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }
}

impl fmt::Debug for ProxyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyStream")
            .field("inner", &self.inner)
            .field("forwarding", &self.forwarding)
            .finish()
    }
}

impl Connection for ProxyStream {
    fn connected(&self) -> Connected {
        self.inner.connected().proxy(self.forwarding)
    }
}

impl Read for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl Write for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<ProxyStream, BoxError>> + Send>>;

/// A resolved proxy endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ProxyTarget {
    /// `http://` or `https://` proxy; forwards `http://` requests and
    /// tunnels the rest with `CONNECT`
    Http {
        uri: Uri,
        auth: Option<HeaderValue>,
    },
    /// SOCKS5 proxy; `local_dns` is false for `socks5h://`
    Socks5 {
        uri: Uri,
        auth: Option<(String, String)>,
        local_dns: bool,
    },
}

impl ProxyTarget {
    /// Parse a proxy URL, dispatching on its scheme.
    ///
    /// Unknown schemes are rejected rather than silently connecting directly.
    pub(crate) fn parse(addr: &str) -> Result<Self, HttpError> {
        let invalid = |reason: String| HttpError::InvalidProxy {
            url: addr.to_owned(),
            reason,
        };

        let url = Url::parse(addr).map_err(|e| invalid(e.to_string()))?;
        let scheme = url.scheme().to_owned();

        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            "socks5" | "socks5h" => 1080,
            _ => return Err(HttpError::UnsupportedProxyScheme { scheme }),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_owned()))?;
        let port = url.port().unwrap_or(default_port);

        let uri: Uri = format!("{scheme}://{host}:{port}")
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;

        let credentials = if url.username().is_empty() {
            None
        } else {
            let user = urlencoding::decode(url.username()).map_err(|e| invalid(e.to_string()))?;
            let pass = urlencoding::decode(url.password().unwrap_or(""))
                .map_err(|e| invalid(e.to_string()))?;
            Some((user.into_owned(), pass.into_owned()))
        };

        match scheme.as_str() {
            "http" | "https" => Ok(ProxyTarget::Http {
                uri,
                auth: credentials
                    .map(|(user, pass)| basic_auth_value(&user, &pass))
                    .transpose()?,
            }),
            _ => Ok(ProxyTarget::Socks5 {
                uri,
                auth: credentials,
                local_dns: scheme == "socks5",
            }),
        }
    }

    fn from_intercept(intercept: &Intercept) -> Result<Self, HttpError> {
        let uri = intercept.uri().clone();
        match uri.scheme_str() {
            Some("http" | "https") => Ok(ProxyTarget::Http {
                auth: intercept.basic_auth().cloned(),
                uri,
            }),
            Some(scheme @ ("socks5" | "socks5h")) => Ok(ProxyTarget::Socks5 {
                auth: intercept
                    .raw_auth()
                    .map(|(user, pass)| (user.to_owned(), pass.to_owned())),
                local_dns: scheme == "socks5",
                uri,
            }),
            other => Err(HttpError::UnsupportedProxyScheme {
                scheme: other.unwrap_or_default().to_owned(),
            }),
        }
    }

    fn uri(&self) -> &Uri {
        match self {
            ProxyTarget::Http { uri, .. } | ProxyTarget::Socks5 { uri, .. } => uri,
        }
    }
}

/// Build a `Basic` credentials header value.
pub(crate) fn basic_auth_value(user: &str, password: &str) -> Result<HeaderValue, HttpError> {
    let encoded = STANDARD.encode(format!("{user}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[derive(Clone)]
enum Route {
    Direct,
    Fixed(ProxyTarget),
    System(Arc<Matcher>),
}

impl Route {
    fn resolve(&self, dst: &Uri) -> Result<Option<ProxyTarget>, HttpError> {
        match self {
            Route::Direct => Ok(None),
            Route::Fixed(target) => Ok(Some(target.clone())),
            Route::System(matcher) => matcher
                .intercept(dst)
                .map(|intercept| ProxyTarget::from_intercept(&intercept))
                .transpose(),
        }
    }
}

/// Connector that dials the destination directly or through the configured proxy.
///
/// The route is fixed when the connector is built; the owning
/// [`Client`](crate::Client) never changes it.
#[derive(Clone)]
pub struct ProxyConnector {
    http: HttpConnector,
    proxy_tls: HttpsConnector<HttpConnector>,
    route: Route,
}

impl ProxyConnector {
    /// Build a connector for the given proxy configuration.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidProxy` or `HttpError::UnsupportedProxyScheme`
    /// for a bad custom proxy URL, and `HttpError::Tls` if TLS roots are unavailable.
    pub fn new(proxy: &ProxyConfig, tls_roots: TlsRootConfig) -> Result<Self, HttpError> {
        let route = match proxy {
            ProxyConfig::None => Route::Direct,
            ProxyConfig::System => Route::System(Arc::new(Matcher::from_env())),
            ProxyConfig::Custom(addr) => Route::Fixed(ProxyTarget::parse(addr)?),
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);

        Ok(Self {
            http,
            proxy_tls: crate::tls::proxy_connector(tls_roots)?,
            route,
        })
    }

    /// Add `Proxy-Authorization` to a request that will be forwarded by an
    /// HTTP(S) proxy with credentials.
    ///
    /// Tunnelled requests carry the credentials on the `CONNECT` instead, so
    /// only plain `http://` destinations are touched. A header already set on
    /// the request is kept.
    pub(crate) fn authorize_forwarded<B>(&self, mut request: Request<B>) -> Request<B> {
        if request.uri().scheme_str() != Some("http")
            || request.headers().contains_key(PROXY_AUTHORIZATION)
        {
            return request;
        }
        if let Ok(Some(ProxyTarget::Http {
            auth: Some(auth), ..
        })) = self.route.resolve(request.uri())
        {
            request.headers_mut().insert(PROXY_AUTHORIZATION, auth);
        }
        request
    }

    fn connect(&self, dst: Uri) -> ConnectFuture {
        let target = self.route.resolve(&dst);
        let http = self.http.clone();
        let proxy_tls = self.proxy_tls.clone();

        Box::pin(async move {
            match target? {
                None => {
                    let tcp = http.oneshot(dst).await?;
                    Ok(ProxyStream::direct(MaybeHttpsStream::Http(tcp)))
                }
                Some(ProxyTarget::Http { uri, .. }) if dst.scheme_str() == Some("http") => {
                    tracing::trace!(
                        proxy = %uri,
                        dst = %dst,
                        "forwarding through HTTP proxy"
                    );
                    let stream = proxy_tls.oneshot(uri).await?;
                    Ok(ProxyStream::forwarding(stream))
                }
                Some(ProxyTarget::Http { uri, auth }) => {
                    tracing::trace!(
                        proxy = %uri,
                        dst = %dst,
                        "connecting through HTTP proxy tunnel"
                    );
                    let mut tunnel = Tunnel::new(uri, proxy_tls);
                    if let Some(auth) = auth {
                        tunnel = tunnel.with_auth(auth);
                    }
                    Ok(ProxyStream::direct(tunnel.oneshot(dst).await?))
                }
                Some(ProxyTarget::Socks5 {
                    uri,
                    auth,
                    local_dns,
                }) => {
                    tracing::trace!(
                        proxy = %uri,
                        dst = %dst,
                        local_dns,
                        "connecting through SOCKS5 proxy"
                    );
                    let mut socks = SocksV5::new(uri, http).local_dns(local_dns);
                    if let Some((user, pass)) = auth {
                        socks = socks.with_auth(user, pass);
                    }
                    let tcp = socks.oneshot(dst).await?;
                    Ok(ProxyStream::direct(MaybeHttpsStream::Http(tcp)))
                }
            }
        })
    }
}

impl fmt::Debug for ProxyConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let route = match &self.route {
            Route::Direct => "direct".to_owned(),
            Route::Fixed(target) => target.uri().to_string(),
            Route::System(_) => "system".to_owned(),
        };
        f.debug_struct("ProxyConnector")
            .field("route", &route)
            .finish_non_exhaustive()
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = ProxyStream;
    type Error = BoxError;
    type Future = ConnectFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        self.connect(dst)
    }
}
