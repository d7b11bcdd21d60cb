//! REST API shared utilities (pagination, id parsing, response types)

pub mod health;
pub mod metrics;
pub mod proxy;
pub mod task;
pub mod user;

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed page_size value for pagination
pub(crate) const MAX_PAGE_SIZE: i64 = 100;

/// Pagination query parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page", deserialize_with = "deserialize_page")]
    pub page: i64,
    #[serde(
        default = "default_page_size",
        deserialize_with = "deserialize_page_size",
        alias = "per_page"
    )]
    pub page_size: i64,
}

impl Default for PaginationQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

pub(crate) fn default_page() -> i64 {
    1
}

pub(crate) fn default_page_size() -> i64 {
    20
}

/// Reject page values less than 1
pub(crate) fn deserialize_page<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    if value < 1 {
        return Err(serde::de::Error::custom(
            "page must be a positive integer (>= 1)",
        ));
    }
    Ok(value)
}

/// Reject page_size values outside 1..=MAX_PAGE_SIZE
pub(crate) fn deserialize_page_size<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    if !(1..=MAX_PAGE_SIZE).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok(value)
}

/// Message response (confirmations, resets)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse a path id; malformed ids are a client error, not a missing resource
pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("invalid id".to_string()))
}
