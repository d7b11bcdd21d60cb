//! Task repository

use crate::domain::{Task, TaskFilter};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> Result<Task>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>>;
    async fn update(&self, task: &Task) -> Result<Task>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn list(&self, filter: &TaskFilter, offset: i64, limit: i64) -> Result<Vec<Task>>;
    async fn count(&self, filter: &TaskFilter) -> Result<i64>;
}

/// Process-local task store, oldest first
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(AppError::Conflict(format!("Task {} already exists", task.id)));
        }
        tasks.push(task.clone());
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn update(&self, task: &Task) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| AppError::NotFound("task not found".to_string()))?;
        *slot = task.clone();
        Ok(task.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(AppError::NotFound("task not found".to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter, offset: i64, limit: i64) -> Result<Vec<Task>> {
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| filter.matches(t))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &TaskFilter) -> Result<i64> {
        let count = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| filter.matches(t))
            .count();
        Ok(count as i64)
    }
}
