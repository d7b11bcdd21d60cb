//! Task business logic

use crate::domain::{CreateTaskInput, Task, TaskFilter, TaskStatus, UpdateTaskInput};
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthContext;
use crate::policy::{authorize_mutation, Mutation};
use crate::repository::TaskRepository;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct TaskService<R: TaskRepository> {
    repo: Arc<R>,
}

/// Caller identity as a user id
fn caller_id(ctx: &AuthContext) -> Result<Uuid> {
    Uuid::parse_str(&ctx.user_id)
        .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Create a task owned by the caller
    pub async fn create(&self, ctx: &AuthContext, input: CreateTaskInput) -> Result<Task> {
        input.validate()?;
        let creator_id = caller_id(ctx)?;

        let task = self.repo.create(&Task::new(input, creator_id)).await?;
        tracing::info!(task_id = %task.id, creator_id = %creator_id, "Task created");
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("task not found".to_string()))
    }

    /// Creator, assignee or admin
    pub async fn update(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        input: UpdateTaskInput,
    ) -> Result<Task> {
        input.validate()?;

        let mut task = self.get(id).await?;
        authorize_mutation(ctx, &task, Mutation::Update)?;

        task.apply(input);
        self.repo.update(&task).await
    }

    /// Creator, assignee or admin
    pub async fn change_status(&self, ctx: &AuthContext, id: Uuid, status: &str) -> Result<Task> {
        let status: TaskStatus = status.parse().map_err(AppError::BadRequest)?;

        let mut task = self.get(id).await?;
        authorize_mutation(ctx, &task, Mutation::ChangeStatus)?;

        task.status = status;
        task.updated_at = Utc::now();
        self.repo.update(&task).await
    }

    /// Creator or admin
    pub async fn delete(&self, ctx: &AuthContext, id: Uuid) -> Result<()> {
        let task = self.get(id).await?;
        authorize_mutation(ctx, &task, Mutation::Delete)?;

        self.repo.delete(id).await?;
        tracing::info!(task_id = %id, user_id = %ctx.user_id, "Task deleted");
        Ok(())
    }

    /// One page of tasks matching `filter`, plus the total match count
    pub async fn list(
        &self,
        filter: &TaskFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Task>, i64)> {
        let offset = super::page_offset(page, page_size);
        let tasks = self.repo.list(filter, offset, page_size).await?;
        let total = self.repo.count(filter).await?;
        Ok((tasks, total))
    }
}
