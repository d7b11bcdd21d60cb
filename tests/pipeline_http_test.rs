//! Admission pipeline behaviour through a real service router

mod common;

use axum::extract::ConnectInfo;
use axum::http::{header, Method, StatusCode};
use chrono::Utc;
use common::{jwt_config, send, send_request, test_config, throttled_config, token_for, TEST_SECRET};
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use taskgate_core::config::ServiceKind;
use taskgate_core::jwt::{Role, TokenCodec};
use taskgate_core::server::{build_task_router, TaskState};
use uuid::Uuid;

fn task_app(config: taskgate_core::Config) -> axum::Router {
    build_task_router(TaskState::new(config, None))
}

#[tokio::test]
async fn test_missing_token_on_protected_path() {
    let app = task_app(test_config(ServiceKind::Tasks));

    let response = send(&app, Method::GET, "/api/v1/tasks", None, None).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.body,
        serde_json::json!({"error": "Unauthorized: no token"})
    );
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn test_expired_and_forged_tokens() {
    let app = task_app(test_config(ServiceKind::Tasks));

    let expired = TokenCodec::new(jwt_config(Some(TEST_SECRET)))
        .issue_with_expiry("user-a", Some(Role::User), Utc::now().timestamp() - 10)
        .unwrap();
    let response = send(&app, Method::GET, "/api/v1/tasks", Some(&expired), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error(), "Token expired");

    let forged = TokenCodec::new(jwt_config(Some("some-other-secret")))
        .issue("user-a", Role::Admin)
        .unwrap();
    let response = send(&app, Method::GET, "/api/v1/tasks", Some(&forged), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error(), "Invalid token");

    let response = send(&app, Method::GET, "/api/v1/tasks", Some("a.b"), None).await;
    assert_eq!(response.error(), "Invalid token");
}

#[tokio::test]
async fn test_preflight_bypasses_rate_limit_and_auth() {
    let app = task_app(throttled_config(ServiceKind::Tasks, 1));

    // Use up the budget; the call itself fails auth
    let first = send(&app, Method::GET, "/api/v1/tasks", None, None).await;
    assert_eq!(first.status, StatusCode::UNAUTHORIZED);
    let second = send(&app, Method::GET, "/api/v1/tasks", None, None).await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);

    let mut preflight = common::request(Method::OPTIONS, "/api/v1/tasks", None, None);
    preflight
        .headers_mut()
        .insert(header::ORIGIN, "https://app.example.com".parse().unwrap());
    preflight
        .headers_mut()
        .insert(header::ACCESS_CONTROL_REQUEST_METHOD, "GET".parse().unwrap());
    let preflight = send_request(&app, preflight).await;
    assert_eq!(preflight.status, StatusCode::OK);
    assert_eq!(preflight.header("access-control-allow-origin"), Some("*"));
    assert_eq!(
        preflight.header("access-control-allow-headers"),
        Some("authorization,content-type")
    );

    // Still throttled afterwards: the pre-flight did not spend or reset the budget
    let third = send(&app, Method::GET, "/api/v1/tasks", None, None).await;
    assert_eq!(third.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_rejection_shape() {
    let app = task_app(throttled_config(ServiceKind::Tasks, 2));
    let token = token_for(&Uuid::new_v4().to_string(), Role::User);

    let first = send(&app, Method::GET, "/api/v1/tasks", Some(&token), None).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-ratelimit-remaining"), Some("1"));

    let second = send(&app, Method::GET, "/api/v1/tasks", Some(&token), None).await;
    assert_eq!(second.header("x-ratelimit-remaining"), Some("0"));

    let third = send(&app, Method::GET, "/api/v1/tasks", Some(&token), None).await;
    assert_eq!(third.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.error(), "Too many requests");
    let retry_after: u64 = third.header("retry-after").unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    assert_eq!(third.header("access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn test_rate_limit_keys_by_client_address() {
    let app = task_app(throttled_config(ServiceKind::Tasks, 1));

    let mut from_a = common::request(Method::GET, "/api/v1/tasks", None, None);
    from_a
        .headers_mut()
        .insert("x-real-ip", "10.0.0.1".parse().unwrap());
    assert_eq!(
        send_request(&app, from_a).await.status,
        StatusCode::UNAUTHORIZED
    );

    let mut again_a = common::request(Method::GET, "/api/v1/tasks", None, None);
    again_a
        .headers_mut()
        .insert("x-real-ip", "10.0.0.1".parse().unwrap());
    assert_eq!(
        send_request(&app, again_a).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    let mut from_b = common::request(Method::GET, "/api/v1/tasks", None, None);
    from_b
        .headers_mut()
        .insert("x-real-ip", "10.0.0.2".parse().unwrap());
    assert_eq!(
        send_request(&app, from_b).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_health_is_outside_the_pipeline() {
    let app = task_app(throttled_config(ServiceKind::Tasks, 1));
    send(&app, Method::GET, "/api/v1/tasks", None, None).await;

    for _ in 0..3 {
        let response = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["service"], "task-service");
    }
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let app = task_app(test_config(ServiceKind::Tasks));
    let response = send(&app, Method::GET, "/metrics", None, None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_framework_rejections_are_json() {
    let app = task_app(test_config(ServiceKind::Tasks));
    let token = token_for(&Uuid::new_v4().to_string(), Role::User);

    let mut malformed = common::request(Method::POST, "/api/v1/tasks", Some(&token), None);
    *malformed.body_mut() = axum::body::Body::from("{not json");
    malformed.headers_mut().insert(
        header::CONTENT_TYPE,
        "application/json".parse().unwrap(),
    );
    let response = send_request(&app, malformed).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(!response.error().is_empty());

    let response = send(&app, Method::GET, "/nowhere", None, None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.error(), "route not found");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = task_app(test_config(ServiceKind::Tasks));
    let mut request = common::request(Method::GET, "/health", None, None);
    request
        .headers_mut()
        .insert("x-request-id", "req-7".parse().unwrap());

    let response = send_request(&app, request).await;
    assert_eq!(response.header("x-request-id"), Some("req-7"));
}

fn from_gateway(token: &str, caller_ip: &str) -> axum::http::Request<axum::body::Body> {
    let mut request = common::request(Method::GET, "/api/v1/tasks", Some(token), None);
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));
    request
        .headers_mut()
        .insert("x-real-ip", caller_ip.parse().unwrap());
    request
}

#[tokio::test]
async fn test_callers_behind_the_gateway_get_their_own_buckets() {
    let mut config = throttled_config(ServiceKind::Tasks, 2);
    config.rate_limit.trust_forwarded_ip = true;
    let app = task_app(config);

    for caller_ip in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
        let token = token_for(&Uuid::new_v4().to_string(), Role::User);
        let response = send_request(&app, from_gateway(&token, caller_ip)).await;
        assert_eq!(response.status, StatusCode::OK, "caller {}", caller_ip);
    }
}

#[tokio::test]
async fn test_untrusted_forwarded_address_is_ignored() {
    let app = task_app(throttled_config(ServiceKind::Tasks, 2));
    let mut statuses = Vec::new();
    for caller_ip in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
        let token = token_for(&Uuid::new_v4().to_string(), Role::User);
        statuses.push(send_request(&app, from_gateway(&token, caller_ip)).await.status);
    }

    // All three share the socket address
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}
