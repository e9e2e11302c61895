//! Header and query-string sanitization for proxied traffic.
//!
//! Strips a configured set of header names from requests before they are
//! forwarded upstream (the caller's `Authorization` carries the magic token,
//! which must never leak upstream; `Host` and hop-by-hop headers belong to
//! the proxy's own connection) and from upstream responses before they are
//! returned. Also removes configured query-parameter names from the
//! forwarded query string.
//!
//! All scrub lists are explicit construction-time configuration — there is
//! no process-wide mutable registry to append to at runtime.

use axum::http::HeaderMap;
use url::form_urlencoded;

use crate::config::SanitizeConfig;

/// Stateless sanitizer built once from [`SanitizeConfig`].
#[derive(Debug, Clone)]
pub struct Sanitizer {
    request_headers: Vec<String>,
    response_headers: Vec<String>,
    query_params: Vec<String>,
}

impl Sanitizer {
    /// Build from configuration. Header and parameter names are stored
    /// lowercased; header matching is case-insensitive.
    #[must_use]
    pub fn new(config: &SanitizeConfig) -> Self {
        Self {
            request_headers: lowercase_all(&config.request_headers),
            response_headers: lowercase_all(&config.response_headers),
            query_params: lowercase_all(&config.query_params),
        }
    }

    /// Copy `headers` minus the configured request scrub list.
    #[must_use]
    pub fn clean_request_headers(&self, headers: &HeaderMap) -> HeaderMap {
        strip_headers(headers, &self.request_headers)
    }

    /// Copy `headers` minus the configured response scrub list.
    #[must_use]
    pub fn clean_response_headers(&self, headers: &HeaderMap) -> HeaderMap {
        strip_headers(headers, &self.response_headers)
    }

    /// Re-encode `query` without the configured parameter names.
    ///
    /// Returns `None` when nothing survives, so callers can drop the `?`
    /// entirely.
    #[must_use]
    pub fn clean_query(&self, query: &str) -> Option<String> {
        if query.is_empty() {
            return None;
        }

        let kept: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .filter(|(name, _)| !self.query_params.contains(&name.to_ascii_lowercase()))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            return None;
        }

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(kept);
        Some(serializer.finish())
    }
}

fn lowercase_all(names: &[String]) -> Vec<String> {
    names.iter().map(|n| n.to_ascii_lowercase()).collect()
}

fn strip_headers(headers: &HeaderMap, scrub: &[String]) -> HeaderMap {
    let mut cleaned = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if scrub.iter().any(|s| s == name.as_str()) {
            continue;
        }
        cleaned.append(name.clone(), value.clone());
    }
    cleaned
}
