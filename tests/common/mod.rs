// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use lumini::config::Config;
use lumini::db::{Backend, FirestoreDb, MemoryDb};
use lumini::middleware::auth::SESSION_COOKIE;
use lumini::profile::MemoryCache;
use lumini::routes::create_router;
use lumini::services::IdentityService;
use lumini::AppState;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app on the in-memory backend and mock identity service.
/// Returns the router and the shared state, with the session signed out.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let state = AppState::new(
        Config::test_default(),
        Backend::Memory(MemoryDb::new()),
        IdentityService::new_mock(),
        Arc::new(MemoryCache::new()),
    );
    // Nothing persisted, so this resolves to signed out.
    state.session.restore();

    (create_router(state.clone()), state)
}

/// Build a request with an optional session token and JSON body.
#[allow(dead_code)]
pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send a request through a clone of the router.
#[allow(dead_code)]
pub async fn send(app: &axum::Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Session token carried by a response's Set-Cookie header.
#[allow(dead_code)]
pub fn session_token(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?;
            let value = pair.strip_prefix(SESSION_COOKIE)?.strip_prefix('=')?;
            (!value.is_empty()).then(|| value.to_string())
        })
}

/// Register an account and return its session token and uid.
#[allow(dead_code)]
pub async fn register(app: &axum::Router, email: &str, password: &str) -> (String, String) {
    let response = send(
        app,
        request(
            "POST",
            "/auth/register",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = session_token(&response).expect("register should set the session cookie");
    let body = body_json(response).await;
    let uid = body["uid"].as_str().unwrap().to_string();
    (token, uid)
}

/// Create a child profile over the API and return its JSON view.
#[allow(dead_code)]
pub async fn create_profile(app: &axum::Router, token: &str, name: &str, sex: &str) -> Value {
    let response = send(
        app,
        request(
            "POST",
            "/api/profiles",
            Some(token),
            Some(serde_json::json!({ "name": name, "sex": sex })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}
