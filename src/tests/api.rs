use axum::{Router, body::Body};
use http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "sg_bootstrap_token_for_tests_0123456789";

fn test_config(restrict_instance_usage: bool) -> String {
    format!(
        r#"
[database]
type = "sqlite"
path = "sqlite::memory:"
wal_mode = false
max_connections = 1

[auth]
restrict_instance_usage = {restrict_instance_usage}

[auth.bootstrap]
username = "root"
name = "Root"
token = "{ADMIN_TOKEN}"
"#
    )
}

async fn test_app_with(restrict_instance_usage: bool) -> Router {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = crate::config::AppConfig::from_str(&test_config(restrict_instance_usage))
        .expect("Failed to parse test config");
    let state = crate::AppState::new(config.clone())
        .await
        .expect("Failed to create AppState");
    crate::build_app(&config, state)
}

async fn test_app() -> Router {
    test_app_with(false).await
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// POST a raw body to the audit endpoint as account `acct-1`.
async fn audit(app: &Router, instance_id: &str, token: Option<&str>, body: &str) -> (StatusCode, Value) {
    audit_with_headers(app, instance_id, token, &[("Chatgpt-Account-Id", "acct-1")], body).await
}

async fn audit_with_headers(
    app: &Router,
    instance_id: &str,
    token: Option<&str>,
    headers: &[(&str, &str)],
    body: &str,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/external/audit/{instance_id}"))
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Create a regular user and return `(user_id, access_token)`.
async fn create_user(app: &Router, username: &str) -> (String, String) {
    let (status, user) = send(
        app,
        "POST",
        "/api/v1/admin/users",
        Some(ADMIN_TOKEN),
        Some(json!({ "username": username, "name": username })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{user}");
    let user_id = user["id"].as_str().unwrap().to_string();

    let (status, token) = send(
        app,
        "POST",
        &format!("/api/v1/admin/users/{user_id}/access-tokens"),
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "laptop" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{token}");
    (user_id, token["token"].as_str().unwrap().to_string())
}

async fn create_instance(app: &Router, name: &str) -> String {
    let (status, instance) = send(
        app,
        "POST",
        "/api/v1/admin/instances",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": name, "url": "https://chat.example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{instance}");
    instance["id"].as_str().unwrap().to_string()
}

async fn set_can_use(app: &Router, user_id: &str, instance_id: &str, can_use: bool) {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/admin/abilities",
        Some(ADMIN_TOKEN),
        Some(json!({ "user_id": user_id, "instance_ids": [instance_id], "can_use": can_use })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

async fn issue_instance_token(app: &Router, token: &str, instance_id: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/v1/me/instances/{instance_id}/token"),
        Some(token),
        None,
    )
    .await
}

fn completion(text: &str) -> String {
    json!({
        "action": "next",
        "model": "gpt-4o",
        "conversation_id": "conv-1",
        "messages": [{
            "id": "m1",
            "author": { "role": "user" },
            "content": { "content_type": "text", "parts": [text] }
        }]
    })
    .to_string()
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = test_app().await;

    let (status, body) = send(&app, "GET", "/api/v1/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "authentication_error");
    assert!(body["error"]["request_id"].is_string());

    let (status, _) = send(&app, "GET", "/api/v1/me", Some("sg_not_a_real_token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bootstrap_admin_can_authenticate() {
    let app = test_app().await;

    let (status, body) = send(&app, "GET", "/api/v1/me", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "root");
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = test_app().await;
    let (_, token) = create_user(&app, "alice").await;

    let (status, body) = send(&app, "GET", "/api/v1/admin/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "permission_error");

    let (status, _) = send(&app, "GET", "/api/v1/admin/users", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_revoked_access_token_stops_working() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;

    let (_, tokens) = send(
        &app,
        "GET",
        &format!("/api/v1/admin/users/{user_id}/access-tokens"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    let token_id = tokens[0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/v1/admin/access-tokens/{token_id}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert!(status.is_success());

    let (status, _) = send(&app, "GET", "/api/v1/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_user_cannot_authenticate() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/admin/users/{user_id}/deactivate"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/api/v1/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Usage RPC
// ============================================================================

#[tokio::test]
async fn test_sum_user_scopes_to_caller() {
    let app = test_app().await;
    let (alice_id, alice_token) = create_user(&app, "alice").await;
    let (bob_id, _) = create_user(&app, "bob").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/user",
        Some(&alice_token),
        Some(json!({ "user_id": bob_id, "duration_windows": ["3h"] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/user",
        Some(&alice_token),
        Some(json!({ "user_id": alice_id, "duration_windows": ["3h", "24h"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let windows = body.as_array().unwrap();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0]["duration_window"], "3h");
    assert_eq!(windows[1]["duration_window"], "24h");
    assert_eq!(windows[0]["stats"]["count"], 0);

    // Admins may read anyone
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/user",
        Some(ADMIN_TOKEN),
        Some(json!({ "user_id": alice_id, "duration_windows": ["7d"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_windows_are_rejected() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/user",
        Some(ADMIN_TOKEN),
        Some(json!({ "duration_windows": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/user",
        Some(ADMIN_TOKEN),
        Some(json!({ "duration_windows": ["1h"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_global_sum_is_admin_only() {
    let app = test_app().await;
    let (_, token) = create_user(&app, "alice").await;
    let request = json!({ "duration_windows": ["30d"] });

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/global",
        Some(&token),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/global",
        Some(ADMIN_TOKEN),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_batch_pair_limit() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/batch/models",
        Some(&token),
        Some(json!({ "duration_window": "24h", "pairs": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let pairs: Vec<Value> = (0..=crate::routes::usage::MAX_BATCH_PAIRS)
        .map(|i| json!({ "user_id": user_id, "model": format!("m{i}") }))
        .collect();
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/batch/models",
        Some(&token),
        Some(json!({ "duration_window": "24h", "pairs": pairs })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_pairs_scope_to_caller() {
    let app = test_app().await;
    let (alice_id, alice_token) = create_user(&app, "alice").await;
    let (bob_id, _) = create_user(&app, "bob").await;
    let instance_id = create_instance(&app, "team-a").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/batch/instances",
        Some(&alice_token),
        Some(json!({
            "duration_window": "24h",
            "pairs": [
                { "user_id": alice_id, "instance_id": instance_id },
                { "user_id": bob_id, "instance_id": instance_id },
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/batch/models",
        Some(&alice_token),
        Some(json!({
            "duration_window": "24h",
            "pairs": [{ "user_id": bob_id, "model": "gpt-4o" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admins may batch over anyone
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/batch/models",
        Some(ADMIN_TOKEN),
        Some(json!({
            "duration_window": "24h",
            "pairs": [{ "user_id": bob_id, "model": "gpt-4o" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_batch_instances_zero_fills() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;
    let used = create_instance(&app, "team-a").await;
    let idle = create_instance(&app, "team-b").await;

    set_can_use(&app, &user_id, &used, true).await;
    let (_, issued) = issue_instance_token(&app, &token, &used).await;
    let instance_token = issued["token"].as_str().unwrap().to_string();
    let (status, _) = audit(&app, &used, Some(&instance_token), &completion("hello")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/batch/instances",
        Some(&token),
        Some(json!({
            "duration_window": "3h",
            "pairs": [
                { "user_id": user_id, "instance_id": idle },
                { "user_id": user_id, "instance_id": used },
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["instance_id"], idle);
    assert_eq!(rows[0]["count"], 0);
    assert_eq!(rows[1]["instance_id"], used);
    assert_eq!(rows[1]["count"], 1);
    assert_eq!(rows[1]["sum_utf8_length"], 5);
}

#[tokio::test]
async fn test_logs_scope_to_caller() {
    let app = test_app().await;
    let (alice_id, alice_token) = create_user(&app, "alice").await;
    let (bob_id, _) = create_user(&app, "bob").await;

    let uri = format!("/api/v1/usage/logs?user_id={bob_id}");
    let (status, _) = send(&app, "GET", &uri, Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/v1/usage/logs?user_id={alice_id}&page_size=10");
    let (status, body) = send(&app, "GET", &uri, Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total"], 0);

    let uri = format!("/api/v1/usage/logs?user_id={bob_id}");
    let (status, _) = send(&app, "GET", &uri, Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_charts_are_admin_only() {
    let app = test_app().await;
    let (_, token) = create_user(&app, "alice").await;

    for uri in [
        "/api/v1/usage/charts/instances?duration_window=24h",
        "/api/v1/usage/charts/models?duration_window=24h&models=gpt-4o",
        "/api/v1/usage/charts/users?duration_window=24h",
    ] {
        let (status, body) = send(&app, "GET", uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["error"]["type"], "permission_error", "{uri}");

        let (status, body) = send(&app, "GET", uri, Some(ADMIN_TOKEN), None).await;
        assert_eq!(status, StatusCode::OK, "{uri}: {body}");
        assert_eq!(body["duration_window"], "24h", "{uri}");
    }
}

#[tokio::test]
async fn test_instance_sum_unknown_instance() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/instance",
        Some(ADMIN_TOKEN),
        Some(json!({
            "instance_id": uuid::Uuid::new_v4(),
            "duration_windows": ["3h"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_restricted_instance_usage_requires_ability() {
    let app = test_app_with(true).await;
    let (user_id, token) = create_user(&app, "alice").await;
    let instance_id = create_instance(&app, "team-a").await;
    let request = json!({ "instance_id": instance_id, "duration_windows": ["3h"] });

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/instance",
        Some(&token),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    set_can_use(&app, &user_id, &instance_id, true).await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/instance",
        Some(&token),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_ingestion_records_usage() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;
    let instance_id = create_instance(&app, "team-a").await;

    // No ability yet
    let (status, _) = issue_instance_token(&app, &token, &instance_id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    set_can_use(&app, &user_id, &instance_id, true).await;
    let (status, issued) = issue_instance_token(&app, &token, &instance_id).await;
    assert_eq!(status, StatusCode::CREATED, "{issued}");
    let instance_token = issued["token"].as_str().unwrap().to_string();

    let (status, _) = audit(&app, &instance_id, Some(&instance_token), &completion("héllo")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/sum/user",
        Some(&token),
        Some(json!({ "duration_windows": ["3h"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["stats"]["count"], 1);
    assert_eq!(body[0]["stats"]["sum_utf8_length"], 6);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/group",
        Some(&token),
        Some(json!({ "instance_id": instance_id, "duration_window": "3h" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["counts"][0]["key"], "acct-1");
    assert_eq!(body["counts"][0]["count"], 1);

    let (status, body) = send(&app, "GET", "/api/v1/usage/logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["model"], "gpt-4o");
}

#[tokio::test]
async fn test_ingestion_rejects_bad_requests() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;
    let instance_id = create_instance(&app, "team-a").await;
    set_can_use(&app, &user_id, &instance_id, true).await;
    let (_, issued) = issue_instance_token(&app, &token, &instance_id).await;
    let instance_token = issued["token"].as_str().unwrap().to_string();

    let (status, _) = audit(&app, &instance_id, None, &completion("hi")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = audit(&app, &instance_id, Some("sgi_unknown"), &completion("hi")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let other_instance = create_instance(&app, "team-b").await;
    let (status, _) = audit(&app, &other_instance, Some(&instance_token), &completion("hi")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = audit(&app, &instance_id, Some(&instance_token), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid JSON body");
}

#[tokio::test]
async fn test_blank_account_ids_group_as_null() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;
    let instance_id = create_instance(&app, "team-a").await;
    set_can_use(&app, &user_id, &instance_id, true).await;
    let (_, issued) = issue_instance_token(&app, &token, &instance_id).await;
    let instance_token = issued["token"].as_str().unwrap().to_string();

    for headers in [
        vec![("cookie", "_account=")],
        vec![("Chatgpt-Account-Id", "  "), ("cookie", "_account=")],
        vec![("Chatgpt-Account-Id", " "), ("cookie", "_account=acct-cookie")],
    ] {
        let (status, _) = audit_with_headers(
            &app,
            &instance_id,
            Some(&instance_token),
            &headers,
            &completion("hi"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/usage/group",
        Some(&token),
        Some(json!({ "instance_id": instance_id, "duration_window": "3h" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["counts"][0]["key"], Value::Null);
    assert_eq!(body["counts"][0]["count"], 2);
    assert_eq!(body["counts"][1]["key"], "acct-cookie");
    assert_eq!(body["counts"][1]["count"], 1);
}

#[tokio::test]
async fn test_revoking_ability_invalidates_instance_token() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;
    let instance_id = create_instance(&app, "team-a").await;
    set_can_use(&app, &user_id, &instance_id, true).await;
    let (_, issued) = issue_instance_token(&app, &token, &instance_id).await;
    let instance_token = issued["token"].as_str().unwrap().to_string();

    set_can_use(&app, &user_id, &instance_id, false).await;

    let (status, _) = audit(&app, &instance_id, Some(&instance_token), &completion("hi")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_me_instances_hides_login_url_without_ability() {
    let app = test_app().await;
    let (user_id, token) = create_user(&app, "alice").await;
    let allowed = create_instance(&app, "a-team").await;
    create_instance(&app, "b-team").await;
    set_can_use(&app, &user_id, &allowed, true).await;

    let (status, body) = send(&app, "GET", "/api/v1/me/instances", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let instances = body.as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0]["can_use"], true);
    assert_eq!(
        instances[0]["login_url"],
        "https://chat.example.com/auth/login?carid=a-team"
    );
    assert_eq!(instances[1]["can_use"], false);
    assert!(instances[1]["login_url"].is_null());
}

#[tokio::test]
async fn test_admin_actions_are_logged() {
    let app = test_app().await;
    create_user(&app, "alice").await;
    create_instance(&app, "team-a").await;

    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/admin/event-logs?event_type=instance.create",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_instance_name_conflicts() {
    let app = test_app().await;
    create_instance(&app, "team-a").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/admin/instances",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "team-a", "url": "https://other.example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}
