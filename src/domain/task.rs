//! Task domain model

use crate::policy::Owned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    #[default]
    Todo,
    InProgress,
    Done,
    Archived,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(TaskStatus::Backlog),
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "archived" => Ok(TaskStatus::Archived),
            _ => Err(format!("invalid status: {}", s)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignee_id: Option<Uuid>,
    pub creator_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New `todo` task owned by `creator_id`
    pub fn new(input: CreateTaskInput, creator_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: input.title.trim().to_string(),
            description: input.description,
            status: TaskStatus::Todo,
            assignee_id: input.assignee_id,
            creator_id,
            due_date: input.due_date,
            labels: input.labels,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update. Assignee and due date are only replaced when given.
    pub fn apply(&mut self, input: UpdateTaskInput) {
        self.title = input.title.trim().to_string();
        self.description = input.description;
        self.labels = input.labels;
        if input.assignee_id.is_some() {
            self.assignee_id = input.assignee_id;
        }
        if input.due_date.is_some() {
            self.due_date = input.due_date;
        }
        self.updated_at = Utc::now();
    }
}

impl Owned for Task {
    fn creator_id(&self) -> String {
        self.creator_id.to_string()
    }

    fn secondary_owner_id(&self) -> Option<String> {
        self.assignee_id.map(|id| id.to_string())
    }
}

fn validate_not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        Err(validator::ValidationError::new("required").with_message("title is required".into()))
    } else {
        Ok(())
    }
}

/// Input for creating a task
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTaskInput {
    #[validate(custom(function = "validate_not_blank"), length(max = 255))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Input for updating a task
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTaskInput {
    #[validate(custom(function = "validate_not_blank"), length(max = 255))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Input for a status change; parsed by the service so unknown values map to 400
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeStatusInput {
    pub status: String,
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.assignee_id.map_or(true, |a| task.assignee_id == Some(a))
    }
}
