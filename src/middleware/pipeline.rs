//! Request admission pipeline
//!
//! Every inbound call passes CORS, then RateLimit, then Auth, in that order.
//! The order is fixed by `AdmissionPipeline::admit`; stages can be left out
//! but never reordered. A rejecting stage ends the call with a JSON error.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::IpAddr, sync::Arc};

use super::auth::{extract_auth_context, AuthContext, AuthRequirement, TokenCheck};
use super::rate_limit::{client_ip, RateLimitDecision, RateLimiter};
use crate::config::Config;
use crate::error::AppError;
use crate::jwt::TokenCodec;

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Transport-independent view of an inbound call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMetadata {
    pub path: String,
    pub preflight: bool,
    /// Caller host, without port
    pub remote_addr: Option<IpAddr>,
    /// Raw `Authorization` value
    pub authorization: Option<String>,
}

impl CallMetadata {
    /// `trust_forwarded` lets a gateway-supplied `X-Real-IP` name the caller
    pub fn from_request(request: &Request<Body>, trust_forwarded: bool) -> Self {
        Self {
            path: request.uri().path().to_string(),
            preflight: request.method() == Method::OPTIONS,
            remote_addr: client_ip(request, trust_forwarded),
            authorization: request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }

    /// Key for the inbound limiter
    pub fn rate_limit_key(&self) -> String {
        self.remote_addr
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Path prefixes that need a bearer token
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    prefixes: Vec<String>,
}

impl ProtectedPaths {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Throttles calls per caller address
#[derive(Debug, Clone)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    fn check(&self, metadata: &CallMetadata) -> Result<RateLimitDecision, AppError> {
        self.limiter
            .enforce(&metadata.rate_limit_key(), "Too many requests")
            .inspect_err(|_| tracing::debug!(path = %metadata.path, "Call throttled"))
    }
}

/// Requires a valid token on protected paths
#[derive(Debug, Clone)]
pub struct AuthStage {
    codec: TokenCodec,
    check: TokenCheck,
    protected: ProtectedPaths,
}

impl AuthStage {
    /// Authoritative stage: signatures are verified
    pub fn verifying(codec: TokenCodec, protected: ProtectedPaths) -> Self {
        Self {
            codec,
            check: TokenCheck::Verify,
            protected,
        }
    }

    /// Non-authoritative stage: structure and expiry only
    pub fn pre_filter(codec: TokenCodec, protected: ProtectedPaths) -> Self {
        Self {
            codec,
            check: TokenCheck::PreFilter,
            protected,
        }
    }

    /// Verify when the codec has a secret, otherwise fall back to pre-filtering
    pub fn for_codec(codec: TokenCodec, protected: ProtectedPaths) -> Self {
        if codec.verifies_signatures() {
            Self::verifying(codec, protected)
        } else {
            tracing::warn!(
                "No JWT secret configured: auth stage only checks token structure and expiry"
            );
            Self::pre_filter(codec, protected)
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.check == TokenCheck::Verify
    }

    /// `Ok(None)` when the path is public or the result is not authoritative
    fn authenticate(&self, metadata: &CallMetadata) -> Result<Option<AuthContext>, AppError> {
        if !self.protected.matches(&metadata.path) {
            return Ok(None);
        }

        let ctx = extract_auth_context(
            metadata.authorization.as_deref(),
            &self.codec,
            self.check,
            AuthRequirement::Required,
        )?;

        Ok(self.is_authoritative().then_some(ctx))
    }
}

/// What the pipeline learned about an admitted call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Admitted {
    /// Verified caller, for calls on protected paths
    pub auth: Option<AuthContext>,
    pub rate_limit: Option<RateLimitDecision>,
}

#[derive(Debug)]
pub enum Admission {
    /// Answer immediately with the CORS pre-flight response
    Preflight,
    Proceed(Admitted),
    Reject(AppError),
}

impl Admission {
    /// How the call was disposed of, for labelling. `None` for pre-flight.
    pub fn outcome(&self) -> Option<AdmissionOutcome> {
        match self {
            Admission::Preflight => None,
            Admission::Proceed(_) => Some(AdmissionOutcome::Admitted),
            Admission::Reject(AppError::RateLimited { .. }) => Some(AdmissionOutcome::RateLimited),
            Admission::Reject(_) => Some(AdmissionOutcome::Unauthenticated),
        }
    }
}

/// Pipeline verdict attached to response extensions for the telemetry layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    RateLimited,
    Unauthenticated,
}

impl AdmissionOutcome {
    pub fn as_label(self) -> &'static str {
        match self {
            AdmissionOutcome::Admitted => "admitted",
            AdmissionOutcome::RateLimited => "rate_limit",
            AdmissionOutcome::Unauthenticated => "auth",
        }
    }
}

/// Caller address the pipeline keyed the call by, for handlers that relay it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub Option<IpAddr>);

/// Ordered CORS, RateLimit and Auth stages
#[derive(Debug, Clone, Default)]
pub struct AdmissionPipeline {
    rate_limit: Option<RateLimitStage>,
    auth: Option<AuthStage>,
    trust_forwarded_ip: bool,
}

impl AdmissionPipeline {
    /// CORS only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate_limit(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limit = Some(RateLimitStage::new(limiter));
        self
    }

    pub fn with_auth(mut self, stage: AuthStage) -> Self {
        self.auth = Some(stage);
        self
    }

    /// Key callers by a gateway-supplied `X-Real-IP` ahead of the socket address
    pub fn trusting_forwarded_ip(mut self, trust: bool) -> Self {
        self.trust_forwarded_ip = trust;
        self
    }

    pub fn trusts_forwarded_ip(&self) -> bool {
        self.trust_forwarded_ip
    }

    /// Stages for a service: RateLimit when enabled, Auth over the configured prefixes
    pub fn from_config(config: &Config, codec: TokenCodec) -> Self {
        let mut pipeline = Self::new().trusting_forwarded_ip(config.rate_limit.trust_forwarded_ip);
        if config.rate_limit.enabled {
            pipeline = pipeline.with_rate_limit(Arc::new(RateLimiter::from_rule(
                "inbound",
                config.rate_limit.inbound,
            )));
        }
        pipeline.with_auth(AuthStage::for_codec(
            codec,
            ProtectedPaths::new(config.protected_prefixes.clone()),
        ))
    }

    pub fn admit(&self, metadata: &CallMetadata) -> Admission {
        if metadata.preflight {
            return Admission::Preflight;
        }

        let rate_limit = match &self.rate_limit {
            Some(stage) => match stage.check(metadata) {
                Ok(decision) => Some(decision),
                Err(e) => return Admission::Reject(e),
            },
            None => None,
        };

        let auth = match &self.auth {
            Some(stage) => match stage.authenticate(metadata) {
                Ok(ctx) => ctx,
                Err(e) => return Admission::Reject(e),
            },
            None => None,
        };

        Admission::Proceed(Admitted { auth, rate_limit })
    }
}

/// Axum adapter for `AdmissionPipeline`.
///
/// Cross-origin headers and pre-flight answers come from the `CorsLayer`
/// wrapped around this middleware, so pre-flights normally never get here.
pub async fn admission_middleware(
    State(pipeline): State<Arc<AdmissionPipeline>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let metadata = CallMetadata::from_request(&request, pipeline.trusts_forwarded_ip());
    let admission = pipeline.admit(&metadata);
    let outcome = admission.outcome();

    let mut response = match admission {
        Admission::Preflight => StatusCode::OK.into_response(),
        Admission::Reject(err) => err.into_response(),
        Admission::Proceed(admitted) => {
            request
                .extensions_mut()
                .insert(ClientAddr(metadata.remote_addr));
            if let Some(ctx) = admitted.auth {
                request.extensions_mut().insert(ctx);
            }

            let mut response = next.run(request).await;
            if let Some(decision) = admitted.rate_limit {
                response.headers_mut().insert(
                    RATE_LIMIT_REMAINING_HEADER,
                    HeaderValue::from(decision.remaining),
                );
            }
            response
        }
    };

    if let Some(outcome) = outcome {
        response.extensions_mut().insert(outcome);
    }
    response
}
