//! Upstream request forwarding.
//!
//! The forwarding collaborator receives an already-authorized request plus
//! the recovered upstream credential and replays it against the configured
//! API root: sanitized headers, sanitized query string, original method and
//! body, and `Authorization: Bearer <upstream credential>`. Responses are
//! buffered and their headers sanitized before being returned.

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::config::ServerConfig;
use crate::security::Sanitizer;
use crate::{Error, Result};

/// Buffered reqwest-backed forwarder, built once and shared read-only.
#[derive(Debug, Clone)]
pub struct Forwarder {
    http: reqwest::Client,
    api_root: Url,
    sanitizer: Sanitizer,
}

impl Forwarder {
    /// Build the forwarding client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the HTTP client cannot be constructed.
    pub fn new(server: &ServerConfig, api_root: Url, sanitizer: Sanitizer) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(server.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("cannot build forwarding client: {e}")))?;

        Ok(Self {
            http,
            api_root,
            sanitizer,
        })
    }

    /// Upstream API root this forwarder targets
    #[must_use]
    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    /// Replay the request upstream and return the (sanitized) response.
    ///
    /// `path` is the canonical request path and `query` the raw query
    /// string; both the forwarded headers and query are cleaned here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the upstream call fails at the transport
    /// level; HTTP-level upstream errors (4xx/5xx) are returned as regular
    /// responses.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: &str,
        headers: &HeaderMap,
        body: Bytes,
        upstream_credential: &str,
    ) -> Result<Response<Body>> {
        let url = self.build_url(path, query)?;

        let mut clean_headers = self.sanitizer.clean_request_headers(headers);
        let bearer = format!("Bearer {upstream_credential}")
            .parse()
            .map_err(|_| Error::Internal("upstream credential is not header-safe".to_string()))?;
        clean_headers.insert("authorization", bearer);

        debug!(method = %method, url = %url, "Proxying to upstream");

        let upstream = self
            .http
            .request(method, url)
            .headers(clean_headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let response_headers = self.sanitizer.clean_response_headers(upstream.headers());
        let bytes = upstream.bytes().await?;

        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            *headers = response_headers;
        }
        response
            .body(Body::from(bytes))
            .map_err(|e| Error::Internal(format!("cannot assemble response: {e}")))
    }

    /// Join the canonical path (and sanitized query) onto the API root.
    fn build_url(&self, path: &str, query: &str) -> Result<Url> {
        let mut url = self.api_root.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}{path}"));
        url.set_query(self.sanitizer.clean_query(query).as_deref());
        Ok(url)
    }
}

/// Response returned when the upstream is unreachable.
#[must_use]
pub fn bad_gateway() -> Response<Body> {
    let body = serde_json::json!({
        "error": "bad_gateway",
        "message": "Upstream API request failed"
    });
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}
