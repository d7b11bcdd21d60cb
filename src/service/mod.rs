//! Business logic layer

pub mod task;
pub mod user;

pub use task::TaskService;
pub use user::{CredentialLimiters, UserService};

/// Row offset of a 1-based page. Pages past `i64::MAX` rows saturate and
/// come back empty.
pub(crate) fn page_offset(page: i64, page_size: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(page_size.max(0))
}
