//! Ownership and role rule gating resource mutations.

use crate::error::AppError;
use crate::jwt::Role;
use crate::middleware::auth::AuthContext;

pub type PolicyResult<T> = std::result::Result<T, AppError>;

/// Ownership attributes a resource exposes to the rule
pub trait Owned {
    fn creator_id(&self) -> String;

    /// Non-creator identity also allowed to edit, e.g. an assignee
    fn secondary_owner_id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Update,
    ChangeStatus,
    Delete,
}

impl Mutation {
    pub fn as_str(self) -> &'static str {
        match self {
            Mutation::Update => "update",
            Mutation::ChangeStatus => "change_status",
            Mutation::Delete => "delete",
        }
    }

    /// Destructive operations leave the secondary owner out
    fn admits_secondary_owner(self) -> bool {
        !matches!(self, Mutation::Delete)
    }
}

/// Whether `identity` acting with `role` may apply `mutation` to `resource`.
pub fn may_mutate<R: Owned + ?Sized>(
    identity: &str,
    role: Option<Role>,
    resource: &R,
    mutation: Mutation,
) -> bool {
    if role == Some(Role::Admin) {
        return true;
    }
    if identity == resource.creator_id() {
        return true;
    }
    mutation.admits_secondary_owner()
        && resource
            .secondary_owner_id()
            .is_some_and(|owner| owner == identity)
}

/// `Forbidden` unless the caller may apply `mutation` to `resource`.
pub fn authorize_mutation<R: Owned + ?Sized>(
    ctx: &AuthContext,
    resource: &R,
    mutation: Mutation,
) -> PolicyResult<()> {
    if may_mutate(&ctx.user_id, ctx.role, resource, mutation) {
        return Ok(());
    }

    metrics::counter!("taskgate_access_denied_total", "operation" => mutation.as_str())
        .increment(1);
    tracing::info!(
        user_id = %ctx.user_id,
        operation = mutation.as_str(),
        "Mutation denied"
    );
    Err(AppError::Forbidden("forbidden".to_string()))
}
