//! Proxy server

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::forward::Forwarder;
use super::hooks::LogHook;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::keys::Keys;
use crate::scopes::ResolvedScopes;
use crate::security::Sanitizer;
use crate::{Error, Result};

/// The magic API proxy server
pub struct Proxy {
    config: Config,
    state: Arc<AppState>,
}

impl Proxy {
    /// Create a new proxy.
    ///
    /// Loading the key material is fatal here: the service refuses to start
    /// without cryptographic material rather than run with authorization
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyLoad`] or [`Error::Config`] if keys, scope
    /// patterns, or the upstream root are unusable.
    pub fn new(config: Config) -> Result<Self> {
        let keys = Arc::new(Keys::from_files(
            Path::new(&config.keys.private_key),
            Path::new(&config.keys.certificate),
        )?);

        let resolved_scopes = Arc::new(ResolvedScopes::from_config(&config.scopes)?);
        let sanitizer = Sanitizer::new(&config.sanitize);
        let forwarder = Forwarder::new(&config.server, config.api_root()?, sanitizer)?;

        let state = Arc::new(AppState {
            keys,
            resolved_scopes,
            tokens: config.tokens.clone(),
            forwarder,
            hook: Arc::new(LogHook),
            max_body_size: config.server.max_body_size,
        });

        Ok(Self { config, state })
    }

    /// Run the proxy until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MAGIC API PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(api_root = %self.config.upstream.api_root, "Proxying to upstream");
        info!(scopes = self.config.scopes.len(), "Configured scopes");
        info!("Mint endpoint: POST /__magictoken");

        if self.config.tokens.seal_credential {
            info!("Embedded upstream credentials are SEALED (AES-256-GCM)");
        } else {
            warn!("Embedded upstream credentials are carried in cleartext claims");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Proxy shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
