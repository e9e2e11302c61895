//! End-to-end flow tests against the router: mint a magic token, then use it
//! as a bearer credential on proxied requests.
//!
//! The upstream root points at a closed port, so an authorized request that
//! reaches the forwarding step comes back as 502. That cleanly separates the
//! three outcomes: 401 (rejected at the gate), 403 (scope denied), 502
//! (authorized and forwarded).

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

use magicproxy::config::{SanitizeConfig, ServerConfig, TokenConfig};
use magicproxy::gateway::forward::Forwarder;
use magicproxy::gateway::hooks::LogHook;
use magicproxy::gateway::{AppState, create_router};
use magicproxy::keys::Keys;
use magicproxy::scopes::ResolvedScopes;
use magicproxy::security::Sanitizer;

const UPSTREAM_CREDENTIAL: &str = "ghp_longlived_privileged_credential";

fn generate_keys() -> Keys {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "magicproxy-test");
    let cert = params.self_signed(&key_pair).unwrap();
    Keys::from_pem(key_pair.serialize_pem().as_bytes(), cert.pem().as_bytes()).unwrap()
}

fn router_with_keys(keys: Keys) -> Router {
    let mut scope_map = HashMap::new();
    scope_map.insert("read".to_string(), vec!["GET,HEAD /**".to_string()]);
    scope_map.insert(
        "items".to_string(),
        vec![
            "GET /v1/items/**".to_string(),
            "POST /v1/items".to_string(),
        ],
    );
    let resolved = ResolvedScopes::from_config(&scope_map).unwrap();

    let server = ServerConfig::default();
    let sanitizer = Sanitizer::new(&SanitizeConfig::default());
    // Nothing listens on port 1: forwarded requests surface as 502
    let api_root = Url::parse("http://127.0.0.1:1").unwrap();
    let forwarder = Forwarder::new(&server, api_root, sanitizer).unwrap();

    let state = AppState {
        keys: Arc::new(keys),
        resolved_scopes: Arc::new(resolved),
        tokens: TokenConfig::default(),
        forwarder,
        hook: Arc::new(LogHook),
        max_body_size: server.max_body_size,
    };
    create_router(Arc::new(state))
}

fn test_router() -> Router {
    router_with_keys(generate_keys())
}

async fn read_body(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn mint(router: &Router, body: Value) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/__magictoken")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, read_body(response).await)
}

async fn proxied(router: &Router, method: &str, path: &str, bearer: Option<&str>) -> StatusCode {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder.body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn info_endpoint_reports_service_identity() {
    let router = test_router();
    let request = Request::builder()
        .uri("/__magictoken")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
    assert_eq!(body["service"], "magic API proxy");
    assert_eq!(body["api_root"], "http://127.0.0.1:1/");
    assert!(
        body["certificate"]
            .as_str()
            .unwrap()
            .contains("BEGIN CERTIFICATE")
    );
}

#[tokio::test]
async fn mint_returns_a_jwt() {
    let router = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/__magictoken")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["read"]}).to_string(),
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/jwt"
    );
    let token = read_body(response).await;
    // header.payload.signature
    assert_eq!(token.split('.').count(), 3);
}

#[tokio::test]
async fn scoped_token_permits_matching_request() {
    let router = test_router();
    let (status, token) =
        mint(&router, json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["read"]})).await;
    assert_eq!(status, StatusCode::OK);

    // Authorized and forwarded (upstream is unreachable, hence 502)
    let status = proxied(&router, "GET", "/v1/anything", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn scoped_token_denies_out_of_scope_method() {
    let router = test_router();
    let (_, token) =
        mint(&router, json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["read"]})).await;

    let status = proxied(&router, "DELETE", "/v1/anything", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn scoped_token_denies_out_of_scope_path() {
    let router = test_router();
    let (_, token) =
        mint(&router, json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["items"]})).await;

    assert_eq!(
        proxied(&router, "GET", "/v1/items/42", Some(&token)).await,
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        proxied(&router, "GET", "/v1/users/42", Some(&token)).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn ad_hoc_allow_list_is_honored() {
    let router = test_router();
    let (status, token) = mint(
        &router,
        json!({"token": UPSTREAM_CREDENTIAL, "allowed": ["POST /v1/items"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        proxied(&router, "POST", "/v1/items", Some(&token)).await,
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        proxied(&router, "POST", "/v1/items/42", Some(&token)).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn missing_credential_is_401_with_challenge() {
    let router = test_router();
    let request = Request::builder()
        .uri("/v1/anything")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["WWW-Authenticate"], "Bearer");
}

#[tokio::test]
async fn garbage_bearer_token_is_401() {
    let router = test_router();
    let status = proxied(&router, "GET", "/v1/anything", Some("not.a.token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_from_another_service_is_401() {
    let router = test_router();
    let other = router_with_keys(generate_keys());
    let (status, foreign_token) =
        mint(&other, json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["read"]})).await;
    assert_eq!(status, StatusCode::OK);

    let status = proxied(&router, "GET", "/v1/anything", Some(&foreign_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mint_rejects_empty_upstream_credential() {
    let router = test_router();
    let (status, body) = mint(&router, json!({"token": "", "scopes": ["read"]})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "invalid_mint_request");
}

#[tokio::test]
async fn mint_rejects_unknown_scope() {
    let router = test_router();
    let (status, _) = mint(
        &router,
        json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["no-such-scope"]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mint_rejects_unparseable_allow_pattern() {
    let router = test_router();
    let (status, _) = mint(
        &router,
        json!({"token": UPSTREAM_CREDENTIAL, "allowed": ["GET relative/path"]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dot_segments_cannot_widen_the_scope() {
    let router = test_router();
    let (_, token) =
        mint(&router, json!({"token": UPSTREAM_CREDENTIAL, "scopes": ["items"]})).await;

    // Canonicalizes to /v1/items/42, still inside the grant
    assert_eq!(
        proxied(&router, "GET", "/v1/items/../items/42", Some(&token)).await,
        StatusCode::BAD_GATEWAY
    );
    // Canonicalizes to /v1/admin, outside the grant
    assert_eq!(
        proxied(&router, "GET", "/v1/items/../admin", Some(&token)).await,
        StatusCode::FORBIDDEN
    );
    // Escapes the root entirely
    assert_eq!(
        proxied(&router, "GET", "/../../etc/passwd", Some(&token)).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn double_encoded_path_is_matched_and_forwarded_identically() {
    let router = test_router();
    let (_, token) = mint(
        &router,
        json!({"token": UPSTREAM_CREDENTIAL, "allowed": ["GET /admin/**"]}),
    )
    .await;

    // Within the grant
    assert_eq!(
        proxied(&router, "GET", "/admin/users", Some(&token)).await,
        StatusCode::BAD_GATEWAY
    );
    // One decode pass leaves %2e%2e literal: this never canonicalizes to
    // /admin and must stay outside the grant
    assert_eq!(
        proxied(
            &router,
            "GET",
            "/v1/items/%252e%252e/%252e%252e/admin",
            Some(&token)
        )
        .await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn token_grants_combine_scopes_and_allow_list() {
    let router = test_router();
    let (status, token) = mint(
        &router,
        json!({
            "token": UPSTREAM_CREDENTIAL,
            "scopes": ["items"],
            "allowed": ["DELETE /v1/items/*"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        proxied(&router, "GET", "/v1/items/42", Some(&token)).await,
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        proxied(&router, "DELETE", "/v1/items/42", Some(&token)).await,
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        proxied(&router, "DELETE", "/v1/other", Some(&token)).await,
        StatusCode::FORBIDDEN
    );
}
