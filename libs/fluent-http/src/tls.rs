//! TLS utilities for the HTTP client.
//!
//! Native root certificates are loaded once and cached to avoid repeated OS
//! certificate store lookups (which can be slow on some platforms).

use crate::error::HttpError;
use crate::settings::TlsRootConfig;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Cached native root certificates.
/// Always stores Ok; empty vec means no certs found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();

    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    let certs: Vec<CertificateDer<'static>> = result.certs;

    if certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = certs.len(), "loaded native root certificates");
    }

    certs
}

/// Get cached native root certificates (may be empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// Get the crypto provider for TLS connections.
///
/// Uses the globally installed provider when there is one, otherwise an
/// aws-lc-rs provider that is not installed globally.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build a rustls `ClientConfig` using the cached native root certificates.
///
/// # Errors
///
/// Returns an error if the OS certificate store is empty or none of its
/// certificates parse.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, String> {
    let certs = native_root_certs();

    if certs.is_empty() {
        return Err("no native root CA certificates found in OS certificate store".to_owned());
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());

    if ignored > 0 {
        tracing::warn!(
            added = added,
            ignored = ignored,
            "some native root certificates could not be parsed"
        );
    }

    if added == 0 {
        return Err(format!(
            "no valid native root CA certificates parsed (found {}, all {} failed to parse)",
            certs.len(),
            ignored
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("failed to set TLS protocol versions: {e}"))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}

/// Wrap `inner` in a TLS connector for origin connections.
///
/// Plain `http://` destinations pass through untouched. ALPN advertises both
/// h2 and http/1.1.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the root certificate store cannot be built.
pub fn https_connector<T>(
    tls_roots: TlsRootConfig,
    inner: T,
) -> Result<HttpsConnector<T>, HttpError> {
    match tls_roots {
        TlsRootConfig::WebPki => Ok(hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(get_crypto_provider())
            .map_err(|e| HttpError::Tls(Arc::new(e)))?
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(inner)),
        TlsRootConfig::Native => {
            let client_config = native_roots_client_config().map_err(tls_message)?;
            Ok(hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(client_config)
                .https_or_http()
                .enable_all_versions()
                .wrap_connector(inner))
        }
    }
}

/// TLS connector used to reach `https://` proxies. Proxies are spoken to over
/// HTTP/1.1 only.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the root certificate store cannot be built.
pub fn proxy_connector(
    tls_roots: TlsRootConfig,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    match tls_roots {
        TlsRootConfig::WebPki => Ok(hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(get_crypto_provider())
            .map_err(|e| HttpError::Tls(Arc::new(e)))?
            .https_or_http()
            .enable_http1()
            .build()),
        TlsRootConfig::Native => {
            let client_config = native_roots_client_config().map_err(tls_message)?;
            Ok(hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(client_config)
                .https_or_http()
                .enable_http1()
                .build())
        }
    }
}

fn tls_message(message: String) -> HttpError {
    let source: Box<dyn std::error::Error + Send + Sync> = message.into();
    HttpError::Tls(Arc::from(source))
}
