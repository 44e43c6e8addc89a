#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Blocking HTTP client with a fluent request builder
//!
//! This crate provides a hyper-based HTTP client with:
//! - A chainable [`RequestBuilder`] whose errors are deferred to execution
//! - Query, header, cookie, Basic auth, form, JSON and multipart support
//! - Lazy response bodies with gzip/deflate decoding (and a zlib fallback)
//! - Text, JSON, bytes and save-to-file accessors
//! - HTTP, HTTPS and SOCKS5 proxies, or the proxy environment variables
//! - Automatic TLS via rustls, connection pooling and redirect following
//!
//! # Global settings
//!
//! The verb functions ([`get`], [`post`], ...) run on a process-wide client
//! built from [`global_settings`]. Install custom settings with
//! [`init_global`] before the first request; the settings are frozen once
//! read. Use [`Client::builder`] for independent clients.
//!
//! # Blocking
//!
//! Executing a request and reading its body block the calling thread on the
//! client's own runtime. Calling them from inside an async runtime fails with
//! [`HttpError::Runtime`].
//!
//! # Example
//!
//! ```ignore
//! use fluent_http::{ProxyConfig, Settings};
//!
//! fluent_http::init_global(
//!     Settings::default()
//!         .with_user_agent("my-app/1.0")
//!         .with_proxy(ProxyConfig::Custom("socks5://127.0.0.1:1080".into())),
//! )?;
//!
//! let items = fluent_http::get("https://example.com/api/items")
//!     .query_param("page", "2")
//!     .accept("json")
//!     .json_map()?;
//!
//! let saved = fluent_http::get("https://example.com/logo")
//!     .to_file("/tmp", None)?;
//! ```

mod builder;
mod client;
mod cookie;
mod decode;
mod download;
mod error;
mod multipart;
mod proxy;
mod redirect;
mod request;
mod response;
mod settings;
mod tls;

pub use builder::ClientBuilder;
pub use client::{Client, TransportService};
pub use cookie::Cookie;
pub use decode::decode_content;
pub use error::{HttpError, InvalidUriKind};
pub use multipart::MultipartWriter;
pub use proxy::{ProxyConnector, ProxyStream};
pub use redirect::{RedirectLimit, RedirectPolicy};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};
pub use settings::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, ProtocolVersion, ProxyConfig,
    RedirectConfig, Settings, TlsRootConfig, global as global_settings, init_global,
};

/// Start a GET request on the global client
pub fn get(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("GET", url)
}

/// Start a POST request on the global client
pub fn post(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("POST", url)
}

/// Start a PUT request on the global client
pub fn put(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("PUT", url)
}

/// Start a DELETE request on the global client
pub fn delete(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("DELETE", url)
}

/// Start a PATCH request on the global client
pub fn patch(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("PATCH", url)
}

/// Start a HEAD request on the global client
pub fn head(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("HEAD", url)
}

/// Start an OPTIONS request on the global client
pub fn options(url: &str) -> RequestBuilder {
    RequestBuilder::new().to("OPTIONS", url)
}
