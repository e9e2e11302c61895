//! Error types for the magic proxy

use std::io;

use thiserror::Error;

/// Result type alias for the magic proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Magic proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key material could not be loaded (fatal at startup)
    #[error("Key load error: {0}")]
    KeyLoad(String),

    /// A mint request failed validation; names the first violated field
    #[error("Invalid mint request: field '{field}': {reason}")]
    InvalidMintRequest {
        /// The offending request field
        field: &'static str,
        /// Human-readable validation failure
        reason: String,
    },

    /// The token encoding could not be parsed
    #[error("Malformed magic token")]
    MalformedToken,

    /// Signature verification failed
    #[error("Invalid magic token signature")]
    InvalidSignature,

    /// The token is past its expiry
    #[error("Magic token expired")]
    Expired,

    /// Uniform authorization failure surfaced to clients.
    ///
    /// Malformed / bad-signature / expired tokens all collapse into this
    /// variant at the gate so callers cannot distinguish the failure mode.
    #[error("Not a valid magic token")]
    Unauthorized,

    /// Valid token whose scopes do not cover the request
    #[error("Disallowed by API proxy")]
    Forbidden,

    /// No credential presented on the request
    #[error("No authorization token presented")]
    MissingCredential,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error (upstream forwarding)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Collapse token decode failures into the uniform [`Error::Unauthorized`].
    ///
    /// Other variants pass through unchanged.
    #[must_use]
    pub fn into_unauthorized(self) -> Self {
        match self {
            Self::MalformedToken | Self::InvalidSignature | Self::Expired => Self::Unauthorized,
            other => other,
        }
    }
}
