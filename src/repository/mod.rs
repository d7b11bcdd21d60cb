//! Data access layer (Repository pattern)
//!
//! Storage engines live behind these traits; the in-memory implementations
//! back the services when no external store is wired in.

pub mod task;
pub mod user;

pub use task::{InMemoryTaskRepository, TaskRepository};
pub use user::{InMemoryUserRepository, UserRepository};
