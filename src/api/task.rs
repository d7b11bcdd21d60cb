//! Task API handlers

use crate::api::{
    default_page, default_page_size, deserialize_page, deserialize_page_size, parse_id,
};
use crate::domain::{
    ChangeStatusInput, CreateTaskInput, Task, TaskFilter, TaskStatus, UpdateTaskInput,
};
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::state::HasTasks;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

/// Filter and pagination for listing tasks
#[derive(Debug, Clone, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub assignee_id: Option<String>,
    #[serde(default = "default_page", deserialize_with = "deserialize_page")]
    pub page: i64,
    #[serde(
        default = "default_page_size",
        deserialize_with = "deserialize_page_size"
    )]
    pub page_size: i64,
}

impl TaskListQuery {
    fn filter(&self) -> Result<TaskFilter> {
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<TaskStatus>().map_err(AppError::BadRequest)?),
            None => None,
        };
        let assignee_id = match self.assignee_id.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_id(raw)?),
            None => None,
        };
        Ok(TaskFilter {
            status,
            assignee_id,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedTask {
    pub task_id: String,
}

/// List tasks
pub async fn list<S: HasTasks>(
    State(state): State<S>,
    AuthUser(_caller): AuthUser,
    Query(query): Query<TaskListQuery>,
) -> Result<impl IntoResponse> {
    let filter = query.filter()?;
    let (tasks, total) = state
        .task_service()
        .list(&filter, query.page, query.page_size)
        .await?;
    Ok(Json(TaskListResponse { tasks, total }))
}

/// Create a task owned by the caller
pub async fn create<S: HasTasks>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Json(input): Json<CreateTaskInput>,
) -> Result<impl IntoResponse> {
    let task = state.task_service().create(&caller, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedTask {
            task_id: task.id.to_string(),
        }),
    ))
}

/// Get task by ID
pub async fn get<S: HasTasks>(
    State(state): State<S>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let task = state.task_service().get(parse_id(&id)?).await?;
    Ok(Json(task))
}

/// Update task
pub async fn update<S: HasTasks>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    Json(input): Json<UpdateTaskInput>,
) -> Result<impl IntoResponse> {
    let task = state
        .task_service()
        .update(&caller, parse_id(&id)?, input)
        .await?;
    Ok(Json(task))
}

/// Change task status
pub async fn change_status<S: HasTasks>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    Json(input): Json<ChangeStatusInput>,
) -> Result<impl IntoResponse> {
    let task = state
        .task_service()
        .change_status(&caller, parse_id(&id)?, &input.status)
        .await?;
    Ok(Json(task))
}

/// Delete task
pub async fn delete<S: HasTasks>(
    State(state): State<S>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.task_service().delete(&caller, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
