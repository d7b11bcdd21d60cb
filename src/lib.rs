//! Taskgate Core - edge gateway and task/user services
//!
//! Every service shares one request-admission pipeline (CORS, rate limit,
//! authentication) and one ownership rule for resource mutations.

pub mod api;
pub mod config;
pub mod domain;
pub mod email;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod policy;
pub mod repository;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod upstream;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
