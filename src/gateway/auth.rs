//! Authorization gate for proxied requests.
//!
//! Terminal in one call per request: extract the bearer credential, decode
//! and verify the magic token, match the request against the token's
//! allow-list, and recover the embedded upstream credential for forwarding.
//!
//! All decode failures (malformed, bad signature, expired) surface uniformly
//! as [`Error::Unauthorized`] so a caller cannot distinguish the failure
//! mode; the specific reason goes to debug-level logs only. The upstream
//! credential is never logged.

use axum::http::{HeaderMap, Method};
use tracing::debug;

use crate::keys::Keys;
use crate::magictoken::{self, Claims};
use crate::scopes::{self, ResolvedScopes};
use crate::{Error, Result};

/// A successful authorization decision.
#[derive(Debug)]
pub struct Authorized {
    /// The recovered upstream credential, ready for forwarding
    pub upstream_credential: String,
    /// Scope identifiers granted to the presented token
    pub scopes: Vec<String>,
    /// The canonical request path the patterns matched.
    ///
    /// Callers forward exactly this string; forwarding any other form
    /// would decouple what was authorized from what is requested upstream.
    pub path: String,
}

/// Run the full gate for one request.
///
/// `raw_path` is the request path as received; it is canonicalized exactly
/// once here, and the canonical form is both matched and returned.
///
/// # Errors
///
/// - [`Error::MissingCredential`] — no `Authorization` header
/// - [`Error::Unauthorized`] — the token failed verification in any way
/// - [`Error::Forbidden`] — valid token but no pattern covers the request,
///   or the path cannot be canonicalized
pub fn authorize(
    keys: &Keys,
    resolved: &ResolvedScopes,
    method: &Method,
    raw_path: &str,
    headers: &HeaderMap,
) -> Result<Authorized> {
    // 1. Extract
    let credential = extract_bearer(headers)?;

    // 2. Decode — signature and expiry are checked before claims are trusted
    let claims = magictoken::decode(keys, credential).map_err(|e| {
        debug!(error = %e, "Magic token rejected");
        e.into_unauthorized()
    })?;

    // 3. Authorize against the canonical path
    let path = scopes::normalize_path(raw_path).map_err(|e| {
        debug!(path = %raw_path, "Uncanonicalizable request path");
        e
    })?;
    if !request_allowed(resolved, &claims, method, &path) {
        debug!(method = %method, path = %path, "No allowed pattern covers request");
        return Err(Error::Forbidden);
    }

    // 4. Recover
    let upstream_credential = magictoken::recover_credential(keys, &claims).map_err(|e| {
        debug!(error = %e, "Embedded credential could not be recovered");
        e.into_unauthorized()
    })?;

    Ok(Authorized {
        upstream_credential,
        scopes: claims.scopes,
        path,
    })
}

/// Pull the bearer credential out of the `Authorization` header, stripping a
/// recognized scheme prefix.
fn extract_bearer(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::MissingCredential)?;

    Ok(value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value))
}

/// Whether any pattern granted to the token covers (method, path).
fn request_allowed(
    resolved: &ResolvedScopes,
    claims: &Claims,
    method: &Method,
    path: &str,
) -> bool {
    let patterns = resolved.patterns_for(&claims.scopes, &claims.allowed);
    scopes::is_allowed(&patterns, method.as_str(), path)
}
