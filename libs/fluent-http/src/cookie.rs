//! Cookies passed through requests and responses.
//!
//! There is no cookie jar: request cookies are sent as given, response
//! cookies are parsed out of `Set-Cookie` for inspection only.

use std::fmt;

/// A single `name=value` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse the `name=value` pair at the start of a `Set-Cookie` header.
    ///
    /// Attributes after the first `;` (`Path`, `Expires`, ...) are ignored.
    /// Returns `None` when there is no `=` or the name is empty.
    #[must_use]
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let value = value.trim().trim_matches('"');
        Some(Self::new(name, value))
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for Cookie {
    fn from((name, value): (N, V)) -> Self {
        Self::new(name, value)
    }
}

/// Join cookies into a single `Cookie` request header value, in order.
pub(crate) fn header_value(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    )
}
