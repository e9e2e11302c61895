//! Magic token claims, codec, and issuance.
//!
//! A magic token is a compact JWS whose claims carry the embedded upstream
//! credential, the granted scope identifiers, a literal allow-list of
//! [`ScopePattern`]s, and the issuance/expiry timestamps. Tokens are
//! stateless: the service signs them at mint time and verifies them on every
//! proxied request; nothing is persisted in between and there is no
//! revocation list.
//!
//! Signature verification happens before any claim is trusted —
//! [`decode`] never hands unverified claims to a caller.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::config::TokenConfig;
use crate::keys::Keys;
use crate::scopes::{ResolvedScopes, ScopePattern};
use crate::{Error, Result};

/// Clock-skew tolerance applied when validating `exp`, in seconds.
///
/// Explicit and bounded: a token is accepted for at most this long past its
/// stated expiry, to tolerate minor clock drift between issuing and
/// verifying hosts (the same host in this service, but the constant keeps
/// the policy visible).
pub const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

/// Claims carried inside a magic token.
///
/// Immutable once signed: the signature covers every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuance time (seconds since epoch)
    pub iat: u64,
    /// Expiry time (seconds since epoch); always strictly after `iat`
    pub exp: u64,
    /// Granted scope identifiers
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Literal allowed patterns granted at mint time
    #[serde(default)]
    pub allowed: Vec<ScopePattern>,
    /// The embedded upstream credential — sealed iff `sealed` is set
    pub token: String,
    /// Whether `token` is an AES-256-GCM sealed blob
    #[serde(default)]
    pub sealed: bool,
}

/// A mint request: the privileged caller's input to issuance.
///
/// Deserialized from JSON with explicit optional fields; a single
/// validation pass runs before any cryptographic work.
#[derive(Debug, Clone, Deserialize)]
pub struct MintRequest {
    /// The upstream credential to embed
    pub token: String,
    /// Scope identifiers to grant (each must be configured)
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    /// Literal allowed pattern strings to grant
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
}

impl MintRequest {
    /// Validate against the data-model invariants, reporting the first
    /// violated field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMintRequest`] naming the offending field.
    pub fn validate(&self, resolved: &ResolvedScopes) -> Result<Vec<ScopePattern>> {
        if self.token.is_empty() {
            return Err(Error::InvalidMintRequest {
                field: "token",
                reason: "must be a non-empty string".to_string(),
            });
        }

        if let Some(scopes) = &self.scopes {
            for scope in scopes {
                if !resolved.contains(scope) {
                    return Err(Error::InvalidMintRequest {
                        field: "scopes",
                        reason: format!("unknown scope '{scope}'"),
                    });
                }
            }
        }

        let mut allowed = Vec::new();
        if let Some(patterns) = &self.allowed {
            for raw in patterns {
                let pattern = ScopePattern::parse(raw).map_err(|e| Error::InvalidMintRequest {
                    field: "allowed",
                    reason: e.to_string(),
                })?;
                allowed.push(pattern);
            }
        }
        Ok(allowed)
    }
}

/// Serialize, sign, and compactly encode `claims`.
///
/// # Errors
///
/// Returns [`Error::Internal`] if signing fails.
pub fn encode(keys: &Keys, claims: &Claims) -> Result<String> {
    jsonwebtoken::encode(&Header::new(keys.algorithm()), claims, keys.encoding_key())
        .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
}

/// Verify the signature and expiry of `token`, then return its claims.
///
/// Verification order matters: the signature is checked before the payload
/// is trusted, so malformed or unsigned tokens never reach scope matching.
///
/// # Errors
///
/// - [`Error::Expired`] — `now > exp` (beyond [`CLOCK_SKEW_LEEWAY_SECS`])
/// - [`Error::InvalidSignature`] — signature or algorithm mismatch
/// - [`Error::MalformedToken`] — anything else (undecodable encoding)
pub fn decode(keys: &Keys, token: &str) -> Result<Claims> {
    let mut validation = Validation::new(keys.algorithm());
    validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
    validation.validate_exp = true;

    match jsonwebtoken::decode::<Claims>(token, keys.decoding_key(), &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => Err(match e.kind() {
            ErrorKind::ExpiredSignature => Error::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => Error::InvalidSignature,
            _ => Error::MalformedToken,
        }),
    }
}

/// Validate a mint request and produce a signed magic token.
///
/// Issuance time is now; expiry is now + the configured TTL. The upstream
/// credential is sealed when `config.seal_credential` is set (the default),
/// so the merely-signed token payload does not expose it. No side effects:
/// issued tokens are returned, never stored.
///
/// # Errors
///
/// Returns [`Error::InvalidMintRequest`] for invalid input (before any
/// cryptographic work) or [`Error::Internal`] if signing fails.
pub fn issue(
    keys: &Keys,
    config: &TokenConfig,
    resolved: &ResolvedScopes,
    request: &MintRequest,
) -> Result<String> {
    let allowed = request.validate(resolved)?;

    let now = unix_now();
    let (token, sealed) = if config.seal_credential {
        (keys.seal(&request.token)?, true)
    } else {
        (request.token.clone(), false)
    };

    let claims = Claims {
        iat: now,
        exp: now.saturating_add(config.ttl.as_secs().max(1)),
        scopes: request.scopes.clone().unwrap_or_default(),
        allowed,
        token,
        sealed,
    };

    encode(keys, &claims)
}

/// Recover the upstream credential from decoded claims, opening the seal if
/// issuance sealed it.
///
/// # Errors
///
/// Returns [`Error::MalformedToken`] if the sealed blob fails to open.
pub fn recover_credential(keys: &Keys, claims: &Claims) -> Result<String> {
    if claims.sealed {
        keys.open(&claims.token)
    } else {
        Ok(claims.token.clone())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
