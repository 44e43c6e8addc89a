use crate::error::HttpError;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("fluent-http/", env!("CARGO_PKG_VERSION"));

/// Default request timeout (connect + transfer)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of redirects to follow
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

static GLOBAL_SETTINGS: OnceLock<Settings> = OnceLock::new();

/// HTTP protocol version used for outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const HTTP_10: Self = Self { major: 1, minor: 0 };
    pub const HTTP_11: Self = Self { major: 1, minor: 1 };
    pub const HTTP_2: Self = Self { major: 2, minor: 0 };

    /// Parse a protocol string such as `HTTP/1.1` or `HTTP/2`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidProtocolVersion` for malformed strings and
    /// for versions the transport cannot speak.
    pub fn parse(proto: &str) -> Result<Self, HttpError> {
        let invalid = || HttpError::InvalidProtocolVersion(proto.to_owned());

        let version = proto.trim().strip_prefix("HTTP/").ok_or_else(invalid)?;
        let (major, minor) = match version.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (version, "0"),
        };

        let parsed = Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        };

        match parsed {
            Self::HTTP_10 | Self::HTTP_11 | Self::HTTP_2 => Ok(parsed),
            _ => Err(invalid()),
        }
    }

    /// Whether this version requires an HTTP/2 connection.
    #[must_use]
    pub fn is_http2(self) -> bool {
        self.major == 2
    }

    pub(crate) fn as_http_version(self) -> http::Version {
        match (self.major, self.minor) {
            (1, 0) => http::Version::HTTP_10,
            (2, _) => http::Version::HTTP_2,
            _ => http::Version::HTTP_11,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::HTTP_11
    }
}

impl FromStr for ProtocolVersion {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_http2() {
            write!(f, "HTTP/2")
        } else {
            write!(f, "HTTP/{}.{}", self.major, self.minor)
        }
    }
}

/// How outgoing connections reach their destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProxyConfig {
    /// Connect directly
    #[default]
    None,
    /// Use the proxy named by `HTTP_PROXY` / `HTTPS_PROXY` / `ALL_PROXY`,
    /// honoring `NO_PROXY`
    System,
    /// Use the given proxy URL (`http://`, `https://`, `socks5://`, `socks5h://`)
    Custom(String),
}

/// Configuration for redirect behavior
///
/// The redirect mechanics are handled by `tower-http`'s follow-redirect
/// middleware; this only configures the policy it consults.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Maximum number of redirects to follow (default: 10)
    ///
    /// Set to `0` to disable redirect following entirely. Individual requests
    /// may override this with
    /// [`RequestBuilder::max_redirects`](crate::RequestBuilder::max_redirects).
    pub max_redirects: usize,

    /// Strip `Authorization`, `Cookie` and `Proxy-Authorization` when a
    /// redirect leaves the original origin (default: true)
    pub strip_sensitive_headers: bool,

    /// Allow HTTPS → HTTP downgrades (default: false)
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

impl RedirectConfig {
    /// Create a configuration that disables redirect following
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_redirects: 0,
            ..Default::default()
        }
    }

    /// Create a configuration for testing against plain-HTTP mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            allow_https_downgrade: true,
            ..Default::default()
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Client settings.
///
/// A [`Client`](crate::Client) is built from one `Settings` value and never
/// changes afterwards. The facade functions ([`get`](crate::get),
/// [`post`](crate::post), ...) use the process-wide settings returned by
/// [`global`]; call [`init_global`] once at program start to replace the
/// defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// User-Agent header value, applied when a request does not set one
    pub user_agent: String,

    /// Protocol version for outgoing requests (default: HTTP/1.1)
    pub protocol: ProtocolVersion,

    /// Proxy configuration (default: direct connections)
    pub proxy: ProxyConfig,

    /// Default request timeout covering dispatch and body transfer (default: 30 seconds)
    pub timeout: Duration,

    /// Redirect policy
    pub redirect: RedirectConfig,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Maximum response body size in bytes, applied to raw and decoded
    /// bodies (default: unlimited)
    pub max_body_size: Option<usize>,

    /// Timeout for idle pooled connections (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            protocol: ProtocolVersion::default(),
            proxy: ProxyConfig::None,
            timeout: DEFAULT_TIMEOUT,
            redirect: RedirectConfig::default(),
            tls_roots: TlsRootConfig::default(),
            max_body_size: None,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl Settings {
    /// Create configuration for testing with mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            redirect: RedirectConfig::for_testing(),
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Default::default()
        }
    }

    /// Set the user agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the protocol version from a string such as `HTTP/1.0`
    ///
    /// # Errors
    /// Returns `HttpError::InvalidProtocolVersion` if the string cannot be parsed.
    pub fn with_protocol(mut self, proto: &str) -> Result<Self, HttpError> {
        self.protocol = ProtocolVersion::parse(proto)?;
        Ok(self)
    }

    /// Set the proxy configuration
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Set the default request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Install the process-wide settings used by the facade functions.
///
/// Must be called before the first request is issued through the facade:
/// the global settings are frozen on first read.
///
/// # Errors
/// Returns `HttpError::SettingsAlreadyInitialized` if the global settings
/// were already installed or already read.
pub fn init_global(settings: Settings) -> Result<(), HttpError> {
    GLOBAL_SETTINGS
        .set(settings)
        .map_err(|_| HttpError::SettingsAlreadyInitialized)
}

/// Process-wide settings, initialized with defaults on first access.
pub fn global() -> &'static Settings {
    GLOBAL_SETTINGS.get_or_init(Settings::default)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_parse() {
        assert_eq!(
            ProtocolVersion::parse("HTTP/1.1").unwrap(),
            ProtocolVersion::HTTP_11
        );
        assert_eq!(
            ProtocolVersion::parse("HTTP/1.0").unwrap(),
            ProtocolVersion::HTTP_10
        );
        assert_eq!(
            ProtocolVersion::parse("HTTP/2").unwrap(),
            ProtocolVersion::HTTP_2
        );
        assert_eq!(
            ProtocolVersion::parse(" HTTP/2.0 ").unwrap(),
            ProtocolVersion::HTTP_2
        );
    }

    #[test]
    fn test_protocol_version_parse_rejects_garbage() {
        for bad in ["", "HTTP", "http/1.1", "HTTP/x.y", "HTTP/3", "HTTP/1.7"] {
            let err = ProtocolVersion::parse(bad).unwrap_err();
            assert!(
                matches!(err, HttpError::InvalidProtocolVersion(ref s) if s == bad),
                "unexpected result for {bad:?}: {err:?}"
            );
        }
    }

    #[test]
    fn test_protocol_version_display_roundtrip() {
        for v in [
            ProtocolVersion::HTTP_10,
            ProtocolVersion::HTTP_11,
            ProtocolVersion::HTTP_2,
        ] {
            assert_eq!(v.to_string().parse::<ProtocolVersion>().unwrap(), v);
        }
    }

    #[test]
    fn test_protocol_version_maps_to_http_version() {
        assert_eq!(
            ProtocolVersion::HTTP_10.as_http_version(),
            http::Version::HTTP_10
        );
        assert_eq!(
            ProtocolVersion::HTTP_11.as_http_version(),
            http::Version::HTTP_11
        );
        assert_eq!(
            ProtocolVersion::HTTP_2.as_http_version(),
            http::Version::HTTP_2
        );
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(settings.protocol, ProtocolVersion::HTTP_11);
        assert_eq!(settings.proxy, ProxyConfig::None);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.redirect.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert!(settings.redirect.strip_sensitive_headers);
        assert!(!settings.redirect.allow_https_downgrade);
        assert_eq!(settings.tls_roots, TlsRootConfig::WebPki);
        assert!(settings.max_body_size.is_none());
    }

    #[test]
    fn test_settings_setters() {
        let settings = Settings::default()
            .with_user_agent("agent/2.0")
            .with_proxy(ProxyConfig::Custom("socks5://127.0.0.1:1080".to_owned()))
            .with_timeout(Duration::from_secs(3))
            .with_protocol("HTTP/1.0")
            .unwrap();

        assert_eq!(settings.user_agent, "agent/2.0");
        assert_eq!(
            settings.proxy,
            ProxyConfig::Custom("socks5://127.0.0.1:1080".to_owned())
        );
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.protocol, ProtocolVersion::HTTP_10);
    }

    #[test]
    fn test_settings_with_invalid_protocol_fails() {
        let result = Settings::default().with_protocol("SPDY/3");
        assert!(matches!(
            result,
            Err(HttpError::InvalidProtocolVersion(_))
        ));
    }

    #[test]
    fn test_redirect_config_presets() {
        assert_eq!(RedirectConfig::disabled().max_redirects, 0);
        assert!(RedirectConfig::for_testing().allow_https_downgrade);
    }

    #[test]
    fn test_global_settings_frozen_after_first_read() {
        // Reading freezes the defaults; a later install must fail rather than
        // silently change settings under in-flight requests.
        let first = global();
        let second = global();
        assert!(std::ptr::eq(first, second));
        assert!(matches!(
            init_global(Settings::default()),
            Err(HttpError::SettingsAlreadyInitialized)
        ));
    }
}
