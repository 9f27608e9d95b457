//! End-to-end calls through the router: authorizer rejections never reach
//! the compute unit, authorized calls reach it exactly once.

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use gateway::{
    create_router, AppState, CallOutcome, CallState, FunctionRuntime, MemoryTableStore,
};
use http_body_util::BodyExt;
use identity::clock::ManualClock;
use identity::{AuthorizeRequest, AuthorizeResponse, ResponseType, TokenSet, UserDirectory};
use serde_json::{json, Value};
use stack::blueprint::{self, ids};
use stack::resources::HttpMethod;
use stack::{StackBuilder, StackConfig};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "hunter2hunter2";
const CALLBACK: &str = "https://example.com/callback";

async fn sign_in(directory: &UserDirectory, scopes: &[&str]) -> TokenSet {
    directory
        .admin_create_user("alice", "alice@example.com", PASSWORD)
        .await
        .unwrap();
    let client_id = directory.client_ids().next().unwrap().to_string();
    let response = directory
        .authorize(AuthorizeRequest {
            client_id,
            redirect_uri: CALLBACK.to_string(),
            response_type: ResponseType::Token,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            username: "alice@example.com".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    match response {
        AuthorizeResponse::Tokens { tokens, .. } => tokens,
        other => panic!("expected tokens, got {:?}", other),
    }
}

fn setup() -> (AppState, Router) {
    let graph = blueprint::synthesize(StackConfig::default()).unwrap();
    let state = AppState::in_memory(graph).unwrap();
    let router = create_router(state.clone()).unwrap();
    (state, router)
}

const OPEN_PATH: &str = "/open";

/// The reference backend plus `GET /open`, bound to the same function with
/// no required scopes, and a directory on a manual clock.
fn setup_open_route() -> (AppState, Router, Arc<ManualClock>) {
    let mut b = StackBuilder::new(StackConfig::default()).unwrap();
    let data = blueprint::declare_data_plane(&mut b).unwrap();
    let identity = blueprint::declare_identity_plane(&mut b).unwrap();
    let api = blueprint::declare_api_plane(&mut b, &data, &identity).unwrap();
    b.bind_method(
        &api.rest_api,
        OPEN_PATH,
        HttpMethod::Get,
        &data.function,
        &api.authorizer,
        &[],
    )
    .unwrap();
    let graph = b.finalize().unwrap();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let directory = UserDirectory::from_graph(&graph)
        .unwrap()
        .with_clock(clock.clone());
    let store = Arc::new(MemoryTableStore::from_graph(&graph));
    let runtime = FunctionRuntime::from_graph(&graph, store).unwrap();
    let state = AppState::new(graph, vec![Arc::new(directory)], runtime);
    let router = create_router(state.clone()).unwrap();
    (state, router, clock)
}

async fn direct_sign_in(directory: &UserDirectory) -> TokenSet {
    directory
        .admin_create_user("carol", "carol@example.com", PASSWORD)
        .await
        .unwrap();
    let client_id = directory.client_ids().next().unwrap().to_string();
    directory
        .initiate_auth(&client_id, "carol@example.com", PASSWORD)
        .await
        .unwrap()
}

fn open_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(OPEN_PATH)
        .header(AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn scan_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/scan");
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn outcome_of(response: &axum::response::Response) -> CallState {
    response
        .extensions()
        .get::<CallOutcome>()
        .map(|o| o.state())
        .unwrap()
}

#[tokio::test]
async fn test_no_token_rejected_without_invocation() {
    let (state, router) = setup();
    let response = router.oneshot(scan_request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(outcome_of(&response), CallState::RejectedNoToken);
    assert_eq!(
        response.headers().get("x-call-outcome").unwrap(),
        "REJECTED_NO_TOKEN"
    );
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let (state, router) = setup();
    let response = router
        .oneshot(scan_request(Some("not-a-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_openid_only_token_forbidden() {
    let (state, router) = setup();
    let tokens = sign_in(state.directory().unwrap(), &["openid"]).await;

    let response = router
        .oneshot(scan_request(Some(&tokens.access_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(outcome_of(&response), CallState::RejectedBadScope);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_id_token_forbidden_on_scoped_route() {
    let (state, router) = setup();
    let tokens = sign_in(state.directory().unwrap(), &["openid", "email"]).await;

    let response = router
        .oneshot(scan_request(Some(&tokens.id_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_direct_sign_in_token_lacks_email_scope() {
    let (state, router) = setup();
    let directory = state.directory().unwrap().clone();
    directory
        .admin_create_user("bob", "bob@example.com", PASSWORD)
        .await
        .unwrap();
    let client_id = directory.client_ids().next().unwrap().to_string();
    let tokens = directory
        .initiate_auth(&client_id, "bob@example.com", PASSWORD)
        .await
        .unwrap();

    let response = router
        .oneshot(scan_request(Some(&tokens.access_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_email_scoped_token_invokes_once() {
    let (state, router) = setup();
    let (_, table) = state.graph.tables().next().unwrap();
    let item = json!({"pk": "user#1", "sk": "profile", "name": "Alice"});
    state
        .runtime
        .store()
        .put(&table.table_name, item.as_object().cloned().unwrap())
        .await
        .unwrap();
    let tokens = sign_in(state.directory().unwrap(), &["openid", "email"]).await;

    let response = router
        .oneshot(scan_request(Some(&tokens.access_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(outcome_of(&response), CallState::Succeeded);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 1);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let items: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(items, vec![item]);
}

#[tokio::test]
async fn test_foreign_issuer_rejected() {
    let foreign_graph = blueprint::synthesize(StackConfig {
        stack_name: "ForeignStack".to_string(),
        ..StackConfig::default()
    })
    .unwrap();
    let foreign = Arc::new(UserDirectory::from_graph(&foreign_graph).unwrap());
    let tokens = sign_in(&foreign, &["email"]).await;

    let graph = blueprint::synthesize(StackConfig::default()).unwrap();
    let state = AppState::in_memory(graph).unwrap().with_directory(foreign);
    let router = create_router(state.clone()).unwrap();

    let response = router
        .oneshot(scan_request(Some(&tokens.access_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_signed_out_token_rejected() {
    let (state, router) = setup();
    let directory = state.directory().unwrap().clone();
    let tokens = sign_in(&directory, &["email"]).await;
    directory.global_sign_out(&tokens.access_token).await.unwrap();

    let response = router
        .oneshot(scan_request(Some(&tokens.access_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let (_, router) = setup();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["routes"][0]["path"], "/scan");
    assert_eq!(health["routes"][0]["scopes"][0], "email");
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (_, router) = setup();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/items")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_method_not_invoked() {
    let (state, router) = setup();
    let tokens = sign_in(state.directory().unwrap(), &["email"]).await;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan")
                .header(AUTHORIZATION, format!("Bearer {}", tokens.access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(!response.status().is_success());
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_open_route_accepts_id_and_access_tokens() {
    let (state, router, _) = setup_open_route();
    let tokens = direct_sign_in(state.directory().unwrap()).await;

    let response = router
        .clone()
        .oneshot(open_request(&tokens.id_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(outcome_of(&response), CallState::Succeeded);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 1);

    let response = router
        .oneshot(open_request(&tokens.access_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 2);
}

#[tokio::test]
async fn test_open_route_rejects_refresh_token() {
    let (state, router, clock) = setup_open_route();
    let tokens = direct_sign_in(state.directory().unwrap()).await;
    let refresh = tokens.refresh_token.unwrap();

    let response = router
        .clone()
        .oneshot(open_request(&refresh))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(outcome_of(&response), CallState::RejectedNoToken);

    // Still a live refresh token long after the access token is gone
    clock.advance(Duration::days(10));
    let response = router.oneshot(open_request(&refresh)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_open_route_rejects_expired_tokens() {
    let (state, router, clock) = setup_open_route();
    let tokens = direct_sign_in(state.directory().unwrap()).await;

    clock.advance(Duration::minutes(30));
    let response = router
        .clone()
        .oneshot(open_request(&tokens.access_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    clock.advance(Duration::minutes(30));
    let response = router
        .oneshot(open_request(&tokens.id_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}

#[tokio::test]
async fn test_refresh_token_unauthorized_on_scoped_route() {
    let (state, router) = setup();
    let directory = state.directory().unwrap().clone();
    directory
        .admin_create_user("alice", "alice@example.com", PASSWORD)
        .await
        .unwrap();
    let client_id = directory.client_ids().next().unwrap().to_string();
    let response = directory
        .authorize(AuthorizeRequest {
            client_id: client_id.clone(),
            redirect_uri: CALLBACK.to_string(),
            response_type: ResponseType::Code,
            scopes: vec!["email".to_string()],
            username: "alice@example.com".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    let code = match response {
        AuthorizeResponse::Code { code, .. } => code,
        other => panic!("expected a code, got {:?}", other),
    };
    let tokens = directory
        .exchange_code(&client_id, &code, CALLBACK)
        .await
        .unwrap();

    // Carries the email scope, but is not a bearer credential
    let response = router
        .oneshot(scan_request(tokens.refresh_token.as_deref()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(outcome_of(&response), CallState::RejectedNoToken);
    assert_eq!(state.runtime.invocations(ids::FUNCTION), 0);
}
