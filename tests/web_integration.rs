//! Integration tests for the HTTP front end
//!
//! Requests go straight through the router with `oneshot`, no socket.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{setup, TestApp, ADMIN_LOGIN, ADMIN_PASSWORD};
use http_body_util::BodyExt;
use std::collections::BTreeSet;
use syspass::acl::Permission;
use syspass::web::build_router;
use tower::ServiceExt;

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn api_token(t: &TestApp, actions: &[Permission]) -> String {
    let actions: BTreeSet<Permission> = actions.iter().copied().collect();
    let (token, _) = t
        .app
        .tokens
        .create(&t.admin, t.admin.id, "web-test", actions, None)
        .await
        .unwrap();
    token
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Log the admin in and return the session cookie
async fn login_cookie(router: &Router) -> String {
    let body = format!("login={}&password={}", ADMIN_LOGIN, ADMIN_PASSWORD);
    let response = router.clone().oneshot(form_post("/login", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/");

    response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_login_page_renders() {
    let t = setup().await;
    let router = build_router(t.app.clone());

    let response = router.oneshot(get("/login")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("password"));
}

#[tokio::test]
async fn test_pages_redirect_to_login() {
    let t = setup().await;
    let router = build_router(t.app.clone());

    for uri in ["/", "/accounts/new", "/users", "/config"] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", uri);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }
}

#[tokio::test]
async fn test_login_session_flow() {
    let t = setup().await;
    t.account("web01", "s3cret-pw").await;
    let router = build_router(t.app.clone());
    let cookie = login_cookie(&router).await;

    let request = Request::builder()
        .uri("/")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("web01"));
}

#[tokio::test]
async fn test_bad_login_shows_error() {
    let t = setup().await;
    let router = build_router(t.app.clone());

    let response = router
        .oneshot(form_post("/login", "login=admin&password=nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Invalid login or password"));
}

#[tokio::test]
async fn test_post_without_csrf_is_rejected() {
    let t = setup().await;
    let router = build_router(t.app.clone());

    let response = router.oneshot(form_post("/logout", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_api_requires_token() {
    let t = setup().await;
    let router = build_router(t.app.clone());

    let response = router.clone().oneshot(get("/api/accounts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_string(response).await;
    assert!(body.contains("missing_token"));

    let response = router
        .oneshot(get_with_token("/api/accounts", "sp_bogus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_search_and_password() {
    let t = setup().await;
    let id = t.account("web01", "s3cret-pw").await;
    t.account("db01", "other-pw-1").await;
    let token = api_token(&t, &[Permission::AccountView, Permission::AccountViewPass]).await;
    let router = build_router(t.app.clone());

    let response = router
        .clone()
        .oneshot(get_with_token("/api/accounts?q=web", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"][0]["name"], "web01");

    let uri = format!("/api/accounts/{}/password", id);
    let response = router.clone().oneshot(get_with_token(&uri, &token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["password"], "s3cret-pw");

    let response = router
        .oneshot(get_with_token("/api/accounts/9999", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_token_actions_are_enforced() {
    let t = setup().await;
    let (category_id, client_id) = t.reference_items().await;
    let token = api_token(&t, &[Permission::AccountView]).await;
    let router = build_router(t.app.clone());

    let payload = serde_json::json!({
        "name": "new",
        "category_id": category_id,
        "client_id": client_id,
        "password": "brand-new-pw",
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/accounts")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.contains("permission_denied"));
}

#[tokio::test]
async fn test_public_link_page() {
    let t = setup().await;
    let id = t.account("web01", "s3cret-pw").await;
    let link = t.app.links.create(&t.admin, id, false).await.unwrap();
    let router = build_router(t.app.clone());

    let response = router
        .clone()
        .oneshot(get(&format!("/link/{}", link.hash)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("s3cret-pw"));

    let response = router.oneshot(get("/link/unknown")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let t = setup().await;
    let router: Router = build_router(t.app.clone());

    let response = router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_task_status_streams_events() {
    let t = setup().await;
    let router = build_router(t.app.clone());
    let cookie = login_cookie(&router).await;

    let task = t.app.tasks.create("export", t.admin.id).unwrap();
    let id = task.id().to_string();
    task.write_status("halfway", 50).unwrap();
    task.end("all done").unwrap();

    let request = Request::builder()
        .uri(format!("/tasks/{}/status", id))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let body = body_string(response).await;
    assert!(body.contains("event: status"));
    assert!(body.contains("all done"));
}
