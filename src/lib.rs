//! Magic API Proxy Library
//!
//! Exchanges a long-lived, highly privileged upstream credential for
//! short-lived, narrowly-scoped "magic tokens", and enforces those scopes on
//! every proxied call.
//!
//! # Flow
//!
//! 1. A privileged caller POSTs the upstream credential plus a scope /
//!    allow-list to `/__magictoken` and receives a signed magic token.
//! 2. A client presents that token as a bearer credential on any proxied
//!    request; the proxy verifies signature and expiry, matches method+path
//!    against the token's allow-list, recovers the embedded upstream
//!    credential, and forwards the request upstream.
//!
//! Everything is stateless between issuance and use: no token store, no
//! revocation list, no shared mutable state across requests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod magictoken;
pub mod scopes;
pub mod security;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
