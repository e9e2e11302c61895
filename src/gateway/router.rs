//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::auth;
use super::forward::{Forwarder, bad_gateway};
use super::hooks::{ResponseContext, ResponseHook, dispatch};
use crate::config::TokenConfig;
use crate::keys::Keys;
use crate::magictoken::{self, MintRequest};
use crate::scopes::ResolvedScopes;
use crate::Error;

/// Shared application state
pub struct AppState {
    /// Signing / verification / sealing key bundle
    pub keys: Arc<Keys>,
    /// Scope identifier -> allowed patterns
    pub resolved_scopes: Arc<ResolvedScopes>,
    /// Token issuance configuration
    pub tokens: TokenConfig,
    /// Upstream forwarding collaborator
    pub forwarder: Forwarder,
    /// Post-proxy response hook
    pub hook: Arc<dyn ResponseHook>,
    /// Maximum accepted request body size (bytes)
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/__magictoken", get(info_handler).post(mint_handler))
        // Every other method+path is a proxied API call
        .fallback(proxy_handler)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /__magictoken` — service identity plus the certificate whose public
/// key verifies issued tokens.
async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": "magic API proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "api_root": state.forwarder.api_root().as_str(),
        "certificate": String::from_utf8_lossy(state.keys.certificate_pem()),
    }))
}

/// `POST /__magictoken` — mint a magic token from an upstream credential.
async fn mint_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MintRequest>,
) -> Response {
    match magictoken::issue(&state.keys, &state.tokens, &state.resolved_scopes, &request) {
        Ok(token) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/jwt")],
            token,
        )
            .into_response(),
        Err(e) => {
            debug!(error = %e, "Mint request rejected");
            error_response(&e)
        }
    }
}

/// Fallback handler — the proxied API surface.
///
/// Gate first, forward second: no error path reaches the upstream without a
/// successful authorize step.
async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    // The gate canonicalizes the path exactly once; the canonical form it
    // matched comes back in `authorized.path` and is what gets forwarded
    let authorized = match auth::authorize(
        &state.keys,
        &state.resolved_scopes,
        &parts.method,
        parts.uri.path(),
        &parts.headers,
    ) {
        Ok(authorized) => authorized,
        Err(e) => return error_response(&e),
    };

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": "payload_too_large",
                    "message": "Request body exceeds the configured limit"
                })),
            )
                .into_response();
        }
    };

    let query = parts.uri.query().unwrap_or("");
    let response = match state
        .forwarder
        .forward(
            parts.method.clone(),
            &authorized.path,
            query,
            &parts.headers,
            body,
            &authorized.upstream_credential,
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, path = %authorized.path, "Upstream forwarding failed");
            return bad_gateway();
        }
    };

    dispatch(
        Arc::clone(&state.hook),
        ResponseContext {
            method: parts.method.to_string(),
            path: authorized.path,
            status: response.status(),
            scopes: authorized.scopes,
        },
    );

    response
}

/// Map an [`Error`] to its HTTP response.
fn error_response(error: &Error) -> Response {
    match error {
        Error::MissingCredential => auth_failure(StatusCode::UNAUTHORIZED, "missing_credential", error),
        // Uniform body for every verification failure mode
        Error::Unauthorized
        | Error::MalformedToken
        | Error::InvalidSignature
        | Error::Expired => auth_failure(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            &Error::Unauthorized,
        ),
        Error::Forbidden => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "forbidden", "message": error.to_string()})),
        )
            .into_response(),
        Error::InvalidMintRequest { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_mint_request", "message": error.to_string()})),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal", "message": "Internal proxy error"})),
        )
            .into_response(),
    }
}

/// 401 response with the standard challenge header.
fn auth_failure(status: StatusCode, code: &str, error: &Error) -> Response {
    (
        status,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({"error": code, "message": error.to_string()})),
    )
        .into_response()
}
