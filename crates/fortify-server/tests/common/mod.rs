#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use fortify_common::types::{LoginRequest, Role};
use fortify_server::app;
use fortify_server::config::ServerConfig;
use fortify_server::state::AppState;
use fortify_storage::auth::hash_password_fast;
use fortify_storage::store::{NewMill, NewUser};
use fortify_storage::{Actor, FortifyStore};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const PASSWORD: &str = "correct-horse";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub async fn build_test_context() -> Result<TestContext> {
    fortify_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let db_url = format!("sqlite://{}/fortify.db?mode=rwc", temp_dir.path().display());
    let store = Arc::new(FortifyStore::new(&db_url, temp_dir.path()).await?);

    store
        .create_user(
            NewUser {
                email: ADMIN_EMAIL.to_string(),
                name: "Admin".to_string(),
                password_hash: hash_password_fast(PASSWORD)?,
                role: Role::SystemAdmin,
                mill_id: None,
            },
            &Actor::system(),
        )
        .await?;

    let mut config = ServerConfig::default();
    config.database.data_dir = temp_dir.path().to_string_lossy().to_string();

    let state = AppState {
        store,
        start_time: Utc::now(),
        jwt_secret: Arc::new("test-secret".to_string()),
        token_expire_secs: 3600,
        config: Arc::new(config),
    };

    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder = builder.header("Content-Type", "application/json");

    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = builder
        .body(Body::from(req_body))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).expect("request should build");
    send(app, req).await
}

pub async fn login(app: &axum::Router, email: &str, password: &str) -> String {
    let (status, body, _) = request_json(
        app,
        "POST",
        "/v1/auth/login",
        None,
        Some(
            serde_json::to_value(LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .expect("login request should serialize"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    assert_eq!(body["err_code"], 0);
    body["data"]["access_token"]
        .as_str()
        .expect("token should exist")
        .to_string()
}

pub async fn admin_token(app: &axum::Router) -> String {
    login(app, ADMIN_EMAIL, PASSWORD).await
}

pub async fn make_mill(ctx: &TestContext, code: &str) -> String {
    ctx.state
        .store
        .create_mill(
            NewMill {
                name: format!("Mill {code}"),
                code: code.to_string(),
                region: "Coast".to_string(),
                country: "KE".to_string(),
                address: None,
            },
            &Actor::system(),
        )
        .await
        .expect("mill should be created")
        .id
}

/// Creates a user with [`PASSWORD`] and returns `(user_id, token)`.
pub async fn make_user(
    ctx: &TestContext,
    email: &str,
    role: Role,
    mill_id: Option<&str>,
) -> (String, String) {
    let user = ctx
        .state
        .store
        .create_user(
            NewUser {
                email: email.to_string(),
                name: email.to_string(),
                password_hash: hash_password_fast(PASSWORD).expect("hash should build"),
                role,
                mill_id: mill_id.map(str::to_string),
            },
            &Actor::system(),
        )
        .await
        .expect("user should be created");
    let token = login(&ctx.app, email, PASSWORD).await;
    (user.id, token)
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0, "unexpected error: {json}");
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code, "unexpected body: {json}");
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json.get("data").is_some());
    assert!(json["data"].is_null());
}

pub fn decode_data<T: DeserializeOwned>(json: &Value) -> T {
    serde_json::from_value(json["data"].clone()).expect("data should decode")
}

pub fn data_id(json: &Value) -> String {
    json["data"]["id"]
        .as_str()
        .expect("data.id should be a string")
        .to_string()
}
