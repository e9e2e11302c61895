//! Best-effort response hooks.
//!
//! A hook observes each proxied response after it has been produced. Hooks
//! are fire-and-forget: they run on a spawned task, their failures are
//! reported to logs only, and they can never affect the response already
//! returned to the client.

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, error};

use crate::Result;

/// Context handed to a hook after proxying. Never includes any credential.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// Request method
    pub method: String,
    /// Canonical request path
    pub path: String,
    /// Upstream response status
    pub status: StatusCode,
    /// Scope identifiers granted to the token that authorized the request
    pub scopes: Vec<String>,
}

/// Observer invoked after each proxied response.
pub trait ResponseHook: Send + Sync {
    /// Handle one proxied response. Errors are logged, never propagated.
    fn on_response(&self, ctx: &ResponseContext) -> Result<()>;
}

/// Default hook: emits a structured tracing event per proxied response.
#[derive(Debug, Default)]
pub struct LogHook;

impl ResponseHook for LogHook {
    fn on_response(&self, ctx: &ResponseContext) -> Result<()> {
        debug!(
            method = %ctx.method,
            path = %ctx.path,
            status = %ctx.status,
            scopes = ?ctx.scopes,
            "Proxied request completed"
        );
        Ok(())
    }
}

/// Dispatch `ctx` to `hook` on a detached task.
pub fn dispatch(hook: Arc<dyn ResponseHook>, ctx: ResponseContext) {
    tokio::spawn(async move {
        if let Err(e) = hook.on_response(&ctx) {
            error!(error = %e, path = %ctx.path, "Response hook failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Error;

    struct CountingHook {
        calls: AtomicUsize,
    }

    impl ResponseHook for CountingHook {
        fn on_response(&self, _ctx: &ResponseContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHook;

    impl ResponseHook for FailingHook {
        fn on_response(&self, _ctx: &ResponseContext) -> Result<()> {
            Err(Error::Internal("hook exploded".to_string()))
        }
    }

    fn ctx() -> ResponseContext {
        ResponseContext {
            method: "GET".to_string(),
            path: "/v1/items".to_string(),
            status: StatusCode::OK,
            scopes: vec!["read".to_string()],
        }
    }

    #[tokio::test]
    async fn dispatch_invokes_hook() {
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
        });
        dispatch(Arc::clone(&hook) as Arc<dyn ResponseHook>, ctx());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_failure_is_swallowed() {
        // Must not panic or propagate anywhere
        dispatch(Arc::new(FailingHook), ctx());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[test]
    fn log_hook_succeeds() {
        assert!(LogHook.on_response(&ctx()).is_ok());
    }
}
