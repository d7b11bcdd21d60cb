//! Shared helpers for HTTP-level tests
//!
//! Routers are the production ones from `server`, driven in-process with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use taskgate_core::config::{
    parse_prefixes, Config, GatewayConfig, JwtConfig, RateLimitConfig, RateLimitRule,
    ServiceKind, TelemetryConfig,
};
use taskgate_core::jwt::{Role, TokenCodec};
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test-secret-key-for-http-testing";

/// Config for `service` with the inbound limiter switched off
pub fn test_config(service: ServiceKind) -> Config {
    Config {
        service,
        http_host: "127.0.0.1".to_string(),
        http_port: service.default_port(),
        jwt: jwt_config(Some(TEST_SECRET)),
        rate_limit: RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        },
        protected_prefixes: parse_prefixes(service.default_protected_prefixes()),
        gateway: GatewayConfig::default(),
        public_url: "http://localhost:8080".to_string(),
        telemetry: TelemetryConfig::default(),
    }
}

/// Same as `test_config` with the inbound limiter at `requests` per minute
pub fn throttled_config(service: ServiceKind, requests: usize) -> Config {
    let mut config = test_config(service);
    config.rate_limit.enabled = true;
    config.rate_limit.inbound = RateLimitRule::new(requests, 60);
    config
}

pub fn jwt_config(secret: Option<&str>) -> JwtConfig {
    JwtConfig {
        secret: secret.map(String::from),
        issuer: "taskgate".to_string(),
        access_token_ttl_secs: 3600,
    }
}

/// A token the test services accept
pub fn token_for(subject: &str, role: Role) -> String {
    TokenCodec::new(jwt_config(Some(TEST_SECRET)))
        .issue(subject, role)
        .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Build a request with an optional bearer token and JSON body
pub fn request(
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send_request(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn send(
    app: &Router,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    send_request(app, request(method, path, token, body)).await
}
