//! Authorization context extraction
//!
//! Provides:
//! - `extract_auth_context` for turning an `Authorization` value into an identity/role pair
//! - `AuthUser` / `OptionalAuth` extractors for handlers

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::jwt::{ClaimSet, Role, TokenCodec, TokenError};
use crate::state::HasTokenCodec;

/// Identity and role of the calling principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthContext {
    /// Empty for anonymous callers
    pub user_id: String,
    pub role: Option<Role>,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, role: Option<Role>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// The `(empty, empty)` context handed to public endpoints
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }
}

impl From<ClaimSet> for AuthContext {
    fn from(claims: ClaimSet) -> Self {
        Self {
            user_id: claims.subject,
            role: claims.role,
        }
    }
}

/// Whether a caller may proceed without a token. Decided by the invoking handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Required,
    Optional,
}

/// How much of a token to trust
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// Signature, structure and expiry
    Verify,
    /// Structure and expiry only; the result must not drive authorization
    PreFilter,
}

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No bearer token where one is required
    #[error("no token supplied")]
    MissingToken,
    /// A token was supplied but did not decode
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] TokenError),
}

impl AuthError {
    /// Message shown to the caller. Malformed and badly signed tokens look the same.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::Unauthenticated(TokenError::MissingToken) => {
                "Unauthorized: no token"
            }
            AuthError::Unauthenticated(TokenError::Expired) => "Token expired",
            AuthError::Unauthenticated(_) => "Invalid token",
        }
    }

    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::Unauthenticated(TokenError::MissingToken) => {
                "missing"
            }
            AuthError::Unauthenticated(TokenError::Expired) => "expired",
            AuthError::Unauthenticated(TokenError::InvalidSignature) => "signature",
            AuthError::Unauthenticated(_) => "malformed",
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        metrics::counter!("taskgate_auth_rejections_total", "reason" => err.reason()).increment(1);
        tracing::debug!(reason = err.reason(), "Rejected unauthenticated call: {}", err);
        AppError::Unauthorized(err.public_message().to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Token part of a `Bearer` authorization value.
///
/// Any other scheme counts as no token at all.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
}

fn bearer_token(value: &str) -> Option<&str> {
    value
        .trim()
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller from an `Authorization` value.
///
/// Without a token, `Optional` callers get the anonymous context and
/// `Required` callers get `MissingToken`. A supplied token that fails to
/// decode is always an error.
pub fn extract_auth_context(
    authorization: Option<&str>,
    codec: &TokenCodec,
    check: TokenCheck,
    requirement: AuthRequirement,
) -> Result<AuthContext, AuthError> {
    let token = match authorization.and_then(bearer_token) {
        Some(token) => token,
        None => {
            return match requirement {
                AuthRequirement::Optional => Ok(AuthContext::anonymous()),
                AuthRequirement::Required => Err(AuthError::MissingToken),
            }
        }
    };

    let claims = match check {
        TokenCheck::Verify => codec.decode(token)?,
        TokenCheck::PreFilter => codec.inspect(token)?,
    };
    Ok(claims.into())
}

fn authorization_value(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Axum extractor for authenticated callers
///
/// Reuses the context the admission pipeline already verified for this
/// call; otherwise verifies the bearer token itself.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthContext);

impl<S> FromRequestParts<S> for AuthUser
where
    S: HasTokenCodec + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            if !ctx.is_anonymous() {
                return Ok(AuthUser(ctx.clone()));
            }
        }

        extract_auth_context(
            authorization_value(parts),
            state.token_codec(),
            TokenCheck::Verify,
            AuthRequirement::Required,
        )
        .map(AuthUser)
    }
}

/// Optional authentication extractor
///
/// Yields the anonymous context when no token is supplied. A supplied but
/// invalid token is still rejected.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub AuthContext);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: HasTokenCodec + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            if !ctx.is_anonymous() {
                return Ok(OptionalAuth(ctx.clone()));
            }
        }

        extract_auth_context(
            authorization_value(parts),
            state.token_codec(),
            TokenCheck::Verify,
            AuthRequirement::Optional,
        )
        .map(OptionalAuth)
    }
}
