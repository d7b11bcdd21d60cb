//! Application state traits for dependency injection
//!
//! Handlers and extractors are generic over these traits so the same code
//! runs against the production states in `server` and test states.

use crate::config::Config;
use crate::jwt::TokenCodec;
use crate::repository::{TaskRepository, UserRepository};
use crate::service::{TaskService, UserService};
use crate::upstream::UpstreamClient;
use metrics_exporter_prometheus::PrometheusHandle;

/// States that can verify bearer tokens
pub trait HasTokenCodec {
    fn token_codec(&self) -> &TokenCodec;
}

/// Shared by every service state
pub trait HasConfig: HasTokenCodec + Clone + Send + Sync + 'static {
    fn config(&self) -> &Config;

    /// Recorder handle when `/metrics` is enabled
    fn metrics_handle(&self) -> Option<&PrometheusHandle>;
}

/// States hosting the task service
pub trait HasTasks: HasConfig {
    type TaskRepo: TaskRepository;

    fn task_service(&self) -> &TaskService<Self::TaskRepo>;
}

/// States hosting the user service
pub trait HasUsers: HasConfig {
    type UserRepo: UserRepository;

    fn user_service(&self) -> &UserService<Self::UserRepo>;
}

/// States that relay calls to backend services
pub trait HasUpstreams: HasConfig {
    fn upstream_client(&self) -> &UpstreamClient;
}
