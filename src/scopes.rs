//! Scope patterns and request matching.
//!
//! A magic token authorizes a request iff at least one of its allowed
//! patterns matches the request method and path. Matching is existential:
//! any match permits, order never matters.
//!
//! # Pattern syntax
//!
//! A pattern string is `"METHODS /path"`:
//!
//! - `METHODS` is `*` or a comma-separated list of HTTP methods
//!   (`GET,POST /v1/items`).
//! - `/path` is matched segment-by-segment against the canonicalized request
//!   path. A segment is a literal, `*` (matches exactly one segment), or a
//!   final `**` (matches any remainder — a prefix rule with a segment
//!   boundary).
//!
//! `GET /v1/*/instances` matches `GET /v1/abc/instances` but not
//! `/v1/abc/def/instances`; `GET /v1/foo/**` matches `/v1/foo` and
//! `/v1/foo/bar` but never `/v1/foobar`.
//!
//! Request paths are canonicalized (percent-decoding, duplicate-slash
//! collapsing, dot-segment removal) **before** matching — matching against
//! the raw path would let encoding tricks bypass the allow-list.

use std::collections::HashMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// HTTP methods a pattern may name.
const KNOWN_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// One allow-list entry: a method set paired with a path rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopePattern {
    /// Uppercased method names; empty means wildcard
    methods: Vec<String>,
    /// Path rule segments
    segments: Vec<PathSegment>,
}

/// One segment of a path rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    /// Must equal the request segment exactly
    Literal(String),
    /// Matches exactly one request segment
    Wildcard,
    /// Matches any remainder; only valid as the final segment
    Rest,
}

impl ScopePattern {
    /// Parse a pattern string of the form `"METHODS /path"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the string is not two space-separated
    /// parts, names an unknown method, or has a malformed path rule.
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        let Some((methods_part, path_part)) = trimmed.split_once(' ') else {
            return Err(Error::Config(format!(
                "pattern '{pattern}' must be 'METHODS /path'"
            )));
        };

        let methods = parse_methods(methods_part, pattern)?;
        let segments = parse_path_rule(path_part.trim(), pattern)?;

        Ok(Self { methods, segments })
    }

    /// Whether this pattern covers `method` on the canonical `path`.
    ///
    /// `path` must already be canonical (see [`normalize_path`]).
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        if !self.matches_method(method) {
            return false;
        }

        let path_segments: Vec<&str> = if path == "/" {
            Vec::new()
        } else {
            path.trim_start_matches('/').split('/').collect()
        };
        match_segments(&self.segments, &path_segments)
    }

    fn matches_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl fmt::Display for ScopePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.methods.is_empty() {
            write!(f, "*")?;
        } else {
            write!(f, "{}", self.methods.join(","))?;
        }
        if self.segments.is_empty() {
            return write!(f, " /");
        }
        write!(f, " ")?;
        for segment in &self.segments {
            match segment {
                PathSegment::Literal(s) => write!(f, "/{s}")?,
                PathSegment::Wildcard => write!(f, "/*")?,
                PathSegment::Rest => write!(f, "/**")?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for ScopePattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ScopePattern> for String {
    fn from(pattern: ScopePattern) -> Self {
        pattern.to_string()
    }
}

fn parse_methods(part: &str, pattern: &str) -> Result<Vec<String>> {
    if part == "*" {
        return Ok(Vec::new());
    }
    part.split(',')
        .map(|m| {
            let upper = m.trim().to_ascii_uppercase();
            if KNOWN_METHODS.contains(&upper.as_str()) {
                Ok(upper)
            } else {
                Err(Error::Config(format!(
                    "pattern '{pattern}' names unknown method '{m}'"
                )))
            }
        })
        .collect()
}

fn parse_path_rule(path: &str, pattern: &str) -> Result<Vec<PathSegment>> {
    if !path.starts_with('/') {
        return Err(Error::Config(format!(
            "pattern '{pattern}' path must start with '/'"
        )));
    }
    if path == "/" {
        return Ok(Vec::new());
    }

    let raw: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        let parsed = match *seg {
            "" => {
                return Err(Error::Config(format!(
                    "pattern '{pattern}' has an empty path segment"
                )));
            }
            "*" => PathSegment::Wildcard,
            "**" => {
                if i != raw.len() - 1 {
                    return Err(Error::Config(format!(
                        "pattern '{pattern}': '**' is only valid as the final segment"
                    )));
                }
                PathSegment::Rest
            }
            literal => PathSegment::Literal(literal.to_string()),
        };
        segments.push(parsed);
    }
    Ok(segments)
}

fn match_segments(rule: &[PathSegment], path: &[&str]) -> bool {
    let mut i = 0;
    for segment in rule {
        match segment {
            PathSegment::Rest => return true,
            PathSegment::Wildcard => {
                if i >= path.len() {
                    return false;
                }
                i += 1;
            }
            PathSegment::Literal(expected) => {
                if path.get(i) != Some(&expected.as_str()) {
                    return false;
                }
                i += 1;
            }
        }
    }
    i == path.len()
}

/// Canonicalize a request path before matching.
///
/// Percent-decodes, collapses duplicate slashes, removes `.` segments,
/// resolves `..` (failing closed if it would climb above the root), strips a
/// trailing slash, and guarantees a leading slash.
///
/// # Errors
///
/// Returns [`Error::Forbidden`] for paths that cannot be canonicalized
/// (invalid UTF-8 after decoding, or `..` escaping the root). Callers treat
/// this as a deny.
pub fn normalize_path(raw: &str) -> Result<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| Error::Forbidden)?;

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            // Empty segments come from duplicate or leading/trailing slashes
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::Forbidden);
                }
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Whether any pattern in the set covers (method, path).
///
/// `path` must already be canonical (see [`normalize_path`]): the request
/// path is canonicalized exactly once per request, and the same string that
/// is matched here is the one forwarded upstream. Re-normalizing would not
/// be idempotent (percent-decoding), letting the matched and forwarded
/// forms diverge. An empty pattern set denies (fail-closed). Never panics,
/// never errors.
#[must_use]
pub fn is_allowed(patterns: &[&ScopePattern], method: &str, path: &str) -> bool {
    patterns.iter().any(|p| p.matches(method, path))
}

/// The resolved authorization config: scope identifier → parsed patterns.
///
/// Built once at startup from the raw config map and shared read-only.
#[derive(Debug, Default)]
pub struct ResolvedScopes {
    map: HashMap<String, Vec<ScopePattern>>,
}

impl ResolvedScopes {
    /// Parse every configured pattern up-front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any configured pattern is malformed, so
    /// a bad allow-list is a startup failure rather than a silent deny.
    pub fn from_config(scopes: &HashMap<String, Vec<String>>) -> Result<Self> {
        let mut map = HashMap::with_capacity(scopes.len());
        for (scope, patterns) in scopes {
            let parsed: Result<Vec<ScopePattern>> = patterns
                .iter()
                .map(|p| {
                    ScopePattern::parse(p).map_err(|e| {
                        Error::Config(format!("scope '{scope}': {e}"))
                    })
                })
                .collect();
            map.insert(scope.clone(), parsed?);
        }
        Ok(Self { map })
    }

    /// Whether `scope` is a known scope identifier.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.map.contains_key(scope)
    }

    /// Union of the patterns granted by `scope_ids` and the literal `extra`
    /// allow-list carried in a token.
    #[must_use]
    pub fn patterns_for<'a>(
        &'a self,
        scope_ids: &[String],
        extra: &'a [ScopePattern],
    ) -> Vec<&'a ScopePattern> {
        let mut patterns: Vec<&ScopePattern> = Vec::new();
        for scope in scope_ids {
            if let Some(granted) = self.map.get(scope) {
                patterns.extend(granted.iter());
            }
        }
        patterns.extend(extra.iter());
        patterns
    }
}
