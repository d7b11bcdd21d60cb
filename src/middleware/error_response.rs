//! Error response normalization middleware
//!
//! Framework-level rejections (unparsable JSON, wrong method, unknown path)
//! come back as text/plain. This rewrites them into the `{"error": ...}`
//! body every other rejection uses, hiding parser details from clients.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ErrorResponse;

/// Middleware that normalizes all error responses to the JSON error shape.
pub async fn normalize_error_response(request: Request<Body>, next: Next) -> Response {
    let uri = request.uri().path().to_string();
    let response = next.run(request).await;

    let status = response.status();

    // Health and metrics render their own plain-text bodies
    if uri == "/health" || uri == "/metrics" {
        return response;
    }

    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.contains("application/json") {
        return response;
    }

    // Body deserialization failures surface as 422; callers see them as malformed input
    let status = if status == StatusCode::UNPROCESSABLE_ENTITY {
        StatusCode::BAD_REQUEST
    } else {
        status
    };
    generic_error_response(status)
}

fn generic_error_response(status: StatusCode) -> Response {
    let message = match status {
        StatusCode::BAD_REQUEST => "Invalid request body",
        StatusCode::UNAUTHORIZED => "Unauthorized",
        StatusCode::FORBIDDEN => "Access denied",
        StatusCode::NOT_FOUND => "Not found",
        StatusCode::METHOD_NOT_ALLOWED => "Method not allowed",
        StatusCode::CONFLICT => "Resource conflict",
        StatusCode::PAYLOAD_TOO_LARGE => "Request body too large",
        StatusCode::TOO_MANY_REQUESTS => "Too many requests",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "Unsupported content type",
        StatusCode::BAD_GATEWAY => "Upstream service unavailable",
        _ if status.is_client_error() => "Client error",
        _ => "An internal error occurred",
    };

    (status, Json(ErrorResponse::new(message))).into_response()
}
