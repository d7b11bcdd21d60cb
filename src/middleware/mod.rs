//! HTTP middleware for Taskgate services
//!
//! - `pipeline`: the ordered CORS, RateLimit and Auth admission stages
//! - `cors`: the permissive `CorsLayer` placed in front of the pipeline
//! - `rate_limit`: sliding-window limiter shared by the pipeline and credential endpoints
//! - `auth`: authorization context extraction and the `AuthUser` extractor
//! - `error_response`, `metrics`: response normalization and observability

pub mod auth;
pub mod cors;
pub mod error_response;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;

pub use auth::{AuthContext, AuthUser, OptionalAuth};
pub use cors::cors_layer;
pub use error_response::normalize_error_response;
pub use metrics::ObservabilityLayer;
pub use pipeline::{admission_middleware, AdmissionOutcome, AdmissionPipeline, ClientAddr};
pub use rate_limit::RateLimiter;
