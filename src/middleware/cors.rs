//! Cross-origin stage
//!
//! Wrapped outermost around the admitted routes, so pre-flight requests are
//! answered before the rate limit or auth could reject them, and every other
//! response (rejections included) carries `Access-Control-Allow-Origin: *`.

use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// Permissive cross-origin policy for the browser-facing API
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
