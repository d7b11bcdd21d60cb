//! User and credential API handlers

use crate::api::{parse_id, MessageResponse, PaginationQuery};
use crate::domain::{
    ConfirmEmailInput, LoginInput, PasswordResetConfirmInput, PasswordResetRequestInput,
    PublicUser, RegisterInput, UpdateUserInput,
};
use crate::error::Result;
use crate::middleware::auth::{AuthUser, OptionalAuth};
use crate::state::HasUsers;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<PublicUser>,
    pub total: i64,
}

/// Register an account. A token is only needed to create admins.
pub async fn register<S: HasUsers>(
    State(state): State<S>,
    OptionalAuth(caller): OptionalAuth,
    Json(input): Json<RegisterInput>,
) -> Result<impl IntoResponse> {
    let user = state.user_service().register(&caller, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisteredUser {
            user_id: user.id.to_string(),
        }),
    ))
}

pub async fn login<S: HasUsers>(
    State(state): State<S>,
    Json(input): Json<LoginInput>,
) -> Result<impl IntoResponse> {
    let token = state.user_service().login(input).await?;
    Ok(Json(LoginResponse { token }))
}

pub async fn confirm_email<S: HasUsers>(
    State(state): State<S>,
    Json(input): Json<ConfirmEmailInput>,
) -> Result<impl IntoResponse> {
    state.user_service().confirm_email(input).await?;
    Ok(Json(MessageResponse::new("email confirmed")))
}

/// Always answers the same way so callers cannot probe for accounts
pub async fn request_password_reset<S: HasUsers>(
    State(state): State<S>,
    Json(input): Json<PasswordResetRequestInput>,
) -> Result<impl IntoResponse> {
    state.user_service().request_password_reset(input).await?;
    Ok(Json(MessageResponse::new(
        "if the account exists, a reset link has been sent",
    )))
}

pub async fn reset_password<S: HasUsers>(
    State(state): State<S>,
    Json(input): Json<PasswordResetConfirmInput>,
) -> Result<impl IntoResponse> {
    state.user_service().reset_password(input).await?;
    Ok(Json(MessageResponse::new("password updated")))
}

/// List users (admin only)
pub async fn list<S: HasUsers>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Query(pagination): Query<PaginationQuery>,
) -> Result<impl IntoResponse> {
    let (users, total) = state
        .user_service()
        .list(&caller, pagination.page, pagination.page_size)
        .await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(PublicUser::from).collect(),
        total,
    }))
}

/// Get user by ID
pub async fn get<S: HasUsers>(
    State(state): State<S>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let user = state.user_service().get(parse_id(&id)?).await?;
    Ok(Json(PublicUser::from(user)))
}

/// Update user
pub async fn update<S: HasUsers>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    Json(input): Json<UpdateUserInput>,
) -> Result<impl IntoResponse> {
    let user = state
        .user_service()
        .update(&caller, parse_id(&id)?, input)
        .await?;
    Ok(Json(PublicUser::from(user)))
}

/// Delete user
pub async fn delete<S: HasUsers>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.user_service().delete(&caller, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
