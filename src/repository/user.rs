//! User repository

use crate::domain::{normalize_email, User};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is taken
    async fn create(&self, user: &User) -> Result<User>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<User>>;
    async fn count(&self) -> Result<i64>;
    async fn update(&self, user: &User) -> Result<User>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Process-local user store, oldest first
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_email(a: &str, b: &str) -> bool {
    normalize_email(a) == normalize_email(b)
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| same_email(&u.email, &user.email)) {
            return Err(AppError::Conflict("email already exists".to_string()));
        }
        users.push(user.clone());
        Ok(user.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| same_email(&u.email, email))
            .cloned())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .users
            .read()
            .await
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.users.read().await.len() as i64)
    }

    async fn update(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        if users
            .iter()
            .any(|u| u.id != user.id && same_email(&u.email, &user.email))
        {
            return Err(AppError::Conflict("email already exists".to_string()));
        }
        let slot = users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
        *slot = user.clone();
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        if users.len() == before {
            return Err(AppError::NotFound("user not found".to_string()));
        }
        Ok(())
    }
}
