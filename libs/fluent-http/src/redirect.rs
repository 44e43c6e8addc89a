//! Redirect policy for the client
//!
//! `tower-http`'s follow-redirect middleware does the redirect mechanics;
//! [`RedirectPolicy`] decides whether each hop is followed:
//! - Limits total redirects (client default, overridable per request)
//! - Strips sensitive headers (`Authorization`, `Cookie`, `Proxy-Authorization`)
//!   once the chain leaves the original origin
//! - Blocks HTTPS → HTTP downgrades unless explicitly allowed
//!
//! Cross-origin redirects are followed.

use crate::settings::RedirectConfig;
use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Per-request redirect limit, carried as a request extension.
///
/// Overrides [`RedirectConfig::max_redirects`] for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectLimit(pub usize);

/// Redirect policy consulted by the follow-redirect middleware.
///
/// A fresh clone is taken for every request, so the counters below are
/// per-request.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    config: RedirectConfig,
    redirect_count: usize,
    cross_origin_detected: bool,
}

impl RedirectPolicy {
    #[must_use]
    pub fn new(config: RedirectConfig) -> Self {
        Self {
            config,
            redirect_count: 0,
            cross_origin_detected: false,
        }
    }

    /// Scheme, host and port all match. Missing schemes count as "https".
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let orig_host = original.host().unwrap_or("");
        let target_host = target.host().unwrap_or("");

        let orig_port = original
            .port_u16()
            .unwrap_or_else(|| default_port(orig_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        orig_scheme == target_scheme && orig_host == target_host && orig_port == target_port
    }

    fn is_https_downgrade(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        orig_scheme == "https" && target_scheme == "http"
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone, E> Policy<B, E> for RedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        self.redirect_count += 1;
        if self.redirect_count > self.config.max_redirects {
            tracing::debug!(
                count = self.redirect_count,
                max = self.config.max_redirects,
                "redirect limit reached"
            );
            return Ok(Action::Stop);
        }

        let original = attempt.previous();
        let target = attempt.location();

        if !self.config.allow_https_downgrade && Self::is_https_downgrade(original, target) {
            tracing::warn!(
                original = %original,
                target = %target,
                "blocking HTTPS to HTTP downgrade redirect"
            );
            return Ok(Action::Stop);
        }

        if !Self::is_same_origin(original, target) {
            self.cross_origin_detected = true;
            tracing::debug!(
                original = %original,
                target = %target,
                "cross-origin redirect"
            );
        }

        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        // Only the initial request carries extensions; follow-up requests
        // are rebuilt by the middleware without them.
        if let Some(RedirectLimit(limit)) = request.extensions().get::<RedirectLimit>() {
            self.config.max_redirects = *limit;
        }

        if self.cross_origin_detected && self.config.strip_sensitive_headers {
            let headers = request.headers_mut();
            for header_name in SENSITIVE_HEADERS {
                if headers.remove(header_name).is_some() {
                    tracing::debug!(
                        header = %header_name,
                        "stripped sensitive header on cross-origin redirect"
                    );
                }
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        // 307/308 redirects resend the body
        Some(body.clone())
    }
}
