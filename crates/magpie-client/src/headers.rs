//! Explicit per-request header state.
//!
//! Cookies and the Referer evolve as a crawl walks through a site. That
//! state is owned by the caller and threaded through every fetch instead
//! of living in a process-wide header dictionary: after each response the
//! fetch primitive folds `Set-Cookie` values in and points the Referer at
//! the URL just requested.

use std::collections::BTreeMap;

use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, REFERER, SET_COOKIE};

#[derive(Debug, Clone, Default)]
pub struct HeaderState {
    base: Vec<(String, String)>,
    cookies: BTreeMap<String, String>,
    referer: Option<String>,
}

impl HeaderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a static header sent with every request (User-Agent variants,
    /// Accept-Language, site-specific API keys).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.base.push((name.into(), value.into()));
        self
    }

    pub fn set_referer(&mut self, url: &str) {
        self.referer = Some(url.to_string());
    }

    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    /// Fold every `Set-Cookie` in a response into the cookie jar. Only the
    /// `name=value` pair is kept; attributes after the first `;` are
    /// dropped.
    pub fn absorb_cookies(&mut self, response_headers: &HeaderMap) {
        for value in response_headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or(raw);
            if let Some((name, value)) = pair.split_once('=') {
                self.cookies
                    .insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    /// The current `Cookie` header value, if any cookies are held.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Materialize the full header map for one request.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.base {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %name, "Skipping invalid header name");
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                tracing::warn!(header = %name, "Skipping invalid header value");
                continue;
            };
            map.insert(name, value);
        }
        if let Some(cookie) = self.cookie_header()
            && let Ok(value) = HeaderValue::from_str(&cookie)
        {
            map.insert(COOKIE, value);
        }
        if let Some(referer) = &self.referer
            && let Ok(value) = HeaderValue::from_str(referer)
        {
            map.insert(REFERER, value);
        }
        map
    }
}
