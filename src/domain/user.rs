//! User domain model

use crate::jwt::Role;
use crate::policy::Owned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

lazy_static::lazy_static! {
    /// Accepted email shape: local part, `@`, domain with a 2+ letter TLD
    pub static ref EMAIL_REGEX: regex::Regex =
        regex::Regex::new(r"^[\w._%+-]+@[\w.-]+\.[a-zA-Z]{2,}$").unwrap();
}

fn validate_email_format(email: &str) -> Result<(), validator::ValidationError> {
    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_email").with_message("invalid email".into()))
    }
}

fn validate_username(username: &str) -> Result<(), validator::ValidationError> {
    if username.trim().is_empty() {
        Err(validator::ValidationError::new("required")
            .with_message("username is required".into()))
    } else {
        Ok(())
    }
}

/// Parse an optional requested role; absent means `user`
pub fn parse_role(role: Option<&str>) -> Result<Role, String> {
    match role.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(Role::User),
        Some(r) => r.parse().map_err(|_| "invalid role".to_string()),
    }
}

/// Emails are compared case-insensitively
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub email_confirmed: bool,
    #[serde(skip_serializing)]
    pub confirmation_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for User {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: String::new(),
            email: String::new(),
            password_hash: String::new(),
            role: Role::User,
            email_confirmed: false,
            confirmation_token_hash: None,
            reset_token_hash: None,
            reset_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user account is owned by itself
impl Owned for User {
    fn creator_id(&self) -> String {
        self.id.to_string()
    }
}

/// User as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            email_confirmed: user.email_confirmed,
            created_at: user.created_at,
        }
    }
}

/// Input for registering a user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(custom(function = "validate_username"), length(max = 64))]
    pub username: String,
    #[validate(custom(function = "validate_email_format"), length(max = 128))]
    pub email: String,
    #[validate(length(
        min = 6,
        message = "password must be at least 6 characters"
    ))]
    pub password: String,
    /// `user` or `admin`; defaults to `user`
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Input for updating a user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateUserInput {
    #[validate(custom(function = "validate_username"), length(max = 64))]
    pub username: String,
    #[validate(custom(function = "validate_email_format"), length(max = 128))]
    pub email: String,
    /// Only admins may change roles
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmEmailInput {
    pub email: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetRequestInput {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetConfirmInput {
    pub email: String,
    pub token: String,
    #[validate(length(min = 6, message = "password too short"))]
    pub new_password: String,
}
