//! User business logic: accounts, credentials and email tokens

use crate::domain::{
    normalize_email, parse_role, ConfirmEmailInput, LoginInput, PasswordResetConfirmInput,
    PasswordResetRequestInput, RegisterInput, UpdateUserInput, User,
};
use crate::email::templates::{confirmation_email, password_reset_email};
use crate::email::{EmailMessage, EmailProvider};
use crate::error::{AppError, Result};
use crate::jwt::{Role, TokenCodec};
use crate::middleware::auth::AuthContext;
use crate::middleware::rate_limit::RateLimiter;
use crate::policy::{authorize_mutation, Mutation};
use crate::repository::UserRepository;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

/// Lifetime of a password reset token
pub const RESET_TOKEN_TTL_MINUTES: i64 = 30;

const INVALID_CREDENTIALS: &str = "invalid credentials";
const INVALID_EMAIL_TOKEN: &str = "invalid token or email";

/// Per-email throttles for the credential endpoints
#[derive(Debug, Clone)]
pub struct CredentialLimiters {
    pub register: Arc<RateLimiter>,
    pub login: Arc<RateLimiter>,
}

pub struct UserService<R: UserRepository> {
    repo: Arc<R>,
    email: Arc<dyn EmailProvider>,
    codec: TokenCodec,
    limiters: CredentialLimiters,
    hmac_key: String,
    public_url: String,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(
        repo: Arc<R>,
        email: Arc<dyn EmailProvider>,
        codec: TokenCodec,
        limiters: CredentialLimiters,
        hmac_key: String,
        public_url: String,
    ) -> Self {
        Self {
            repo,
            email,
            codec,
            limiters,
            hmac_key,
            public_url,
        }
    }

    /// Register an account. Only admins may create admin accounts.
    pub async fn register(&self, caller: &AuthContext, input: RegisterInput) -> Result<User> {
        let email = normalize_email(&input.email);
        self.limiters
            .register
            .enforce(&email, "too many registration attempts, try later")?;

        input.validate()?;
        let role = parse_role(input.role.as_deref()).map_err(AppError::Validation)?;
        if role == Role::Admin && !caller.is_admin() {
            return Err(AppError::Forbidden(
                "only admins may create admin accounts".to_string(),
            ));
        }

        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("email already exists".to_string()));
        }

        let token = generate_token();
        let user = User {
            username: input.username.trim().to_string(),
            email,
            password_hash: hash_password(&input.password)?,
            role,
            confirmation_token_hash: Some(hash_token(&token, self.hmac_key.as_bytes())?),
            ..Default::default()
        };
        let user = self.repo.create(&user).await?;
        tracing::info!(user_id = %user.id, role = %user.role, "User registered");

        self.deliver(confirmation_email(&self.public_url, &user.email, &token))
            .await;
        Ok(user)
    }

    /// Exchange credentials for a signed access token
    pub async fn login(&self, input: LoginInput) -> Result<String> {
        let email = normalize_email(&input.email);
        self.limiters
            .login
            .enforce(&email, "too many login attempts, try later")?;

        let user = match self.repo.find_by_email(&email).await? {
            Some(user) if verify_password(&input.password, &user.password_hash)? => user,
            _ => {
                metrics::counter!("taskgate_auth_login_total", "result" => "failure").increment(1);
                return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
            }
        };

        metrics::counter!("taskgate_auth_login_total", "result" => "success").increment(1);
        self.codec
            .issue(&user.id.to_string(), user.role)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to issue token: {}", e)))
    }

    pub async fn confirm_email(&self, input: ConfirmEmailInput) -> Result<()> {
        let mut user = self
            .repo
            .find_by_email(&input.email)
            .await?
            .ok_or_else(|| AppError::BadRequest(INVALID_EMAIL_TOKEN.to_string()))?;

        if user.email_confirmed {
            return Err(AppError::Conflict("email already confirmed".to_string()));
        }

        let presented = hash_token(&input.token, self.hmac_key.as_bytes())?;
        if user.confirmation_token_hash.as_deref() != Some(presented.as_str()) {
            return Err(AppError::BadRequest(INVALID_EMAIL_TOKEN.to_string()));
        }

        user.email_confirmed = true;
        user.confirmation_token_hash = None;
        user.updated_at = Utc::now();
        self.repo.update(&user).await?;
        Ok(())
    }

    /// Issue a reset token by email. Succeeds whether or not the account exists.
    pub async fn request_password_reset(&self, input: PasswordResetRequestInput) -> Result<()> {
        let Some(mut user) = self.repo.find_by_email(&input.email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_token();
        user.reset_token_hash = Some(hash_token(&token, self.hmac_key.as_bytes())?);
        user.reset_expires_at = Some(Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES));
        user.updated_at = Utc::now();
        self.repo.update(&user).await?;

        self.deliver(password_reset_email(
            &self.public_url,
            &user.email,
            &token,
            RESET_TOKEN_TTL_MINUTES,
        ))
        .await;
        Ok(())
    }

    pub async fn reset_password(&self, input: PasswordResetConfirmInput) -> Result<()> {
        let mut user = self
            .repo
            .find_by_email(&input.email)
            .await?
            .ok_or_else(|| AppError::BadRequest(INVALID_EMAIL_TOKEN.to_string()))?;

        let presented = hash_token(&input.token, self.hmac_key.as_bytes())?;
        if user.reset_token_hash.as_deref() != Some(presented.as_str()) {
            return Err(AppError::BadRequest(INVALID_EMAIL_TOKEN.to_string()));
        }
        if user.reset_expires_at.map_or(true, |at| at < Utc::now()) {
            return Err(AppError::BadRequest("token expired".to_string()));
        }
        input.validate()?;

        user.password_hash = hash_password(&input.new_password)?;
        user.reset_token_hash = None;
        user.reset_expires_at = None;
        user.updated_at = Utc::now();
        self.repo.update(&user).await?;
        tracing::info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<User> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))
    }

    /// Admin only
    pub async fn list(
        &self,
        caller: &AuthContext,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<User>, i64)> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("admin role required".to_string()));
        }
        let offset = super::page_offset(page, page_size);
        let users = self.repo.list(offset, page_size).await?;
        let total = self.repo.count().await?;
        Ok((users, total))
    }

    /// The user themself or an admin. Role changes need an admin.
    pub async fn update(
        &self,
        caller: &AuthContext,
        id: Uuid,
        input: UpdateUserInput,
    ) -> Result<User> {
        input.validate()?;

        let mut user = self.get(id).await?;
        authorize_mutation(caller, &user, Mutation::Update)?;

        if let Some(requested) = input.role.as_deref().filter(|r| !r.trim().is_empty()) {
            let role = parse_role(Some(requested)).map_err(AppError::Validation)?;
            if role != user.role && !caller.is_admin() {
                return Err(AppError::Forbidden("only admins may change roles".to_string()));
            }
            user.role = role;
        }

        user.username = input.username.trim().to_string();
        user.email = normalize_email(&input.email);
        user.updated_at = Utc::now();
        self.repo.update(&user).await
    }

    /// The user themself or an admin
    pub async fn delete(&self, caller: &AuthContext, id: Uuid) -> Result<()> {
        let user = self.get(id).await?;
        authorize_mutation(caller, &user, Mutation::Delete)?;

        self.repo.delete(id).await?;
        tracing::info!(user_id = %id, deleted_by = %caller.user_id, "User deleted");
        Ok(())
    }

    /// Delivery failures are logged; the triggering operation still succeeds
    async fn deliver(&self, message: EmailMessage) {
        if let Err(e) = self.email.send(&message).await {
            warn!(
                provider = self.email.provider_name(),
                subject = %message.subject,
                "Failed to send email: {}",
                e
            );
        }
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid hash format: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// 32 random bytes, hex encoded
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Deterministic HMAC-SHA256 digest, so stored tokens can be compared by hash
fn hash_token(token: &str, key: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init error: {}", e)))?;
    mac.update(token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
