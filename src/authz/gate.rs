use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::permissions::{Grants, Permissions};
use crate::error::AuthError;
use crate::identity::{RequestContext, ANONYMOUS_ID};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequireMode {
    #[default]
    All,
    Any,
}

/// Declarative permission requirement attached to a set of routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequirement {
    pub permissions: Vec<String>,
    #[serde(default)]
    pub mode: RequireMode,
}

impl PermissionRequirement {
    pub fn all<I, S>(perms: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        Self { permissions: perms.into_iter().map(Into::into).collect(), mode: RequireMode::All }
    }

    pub fn any<I, S>(perms: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        Self { permissions: perms.into_iter().map(Into::into).collect(), mode: RequireMode::Any }
    }

    pub fn is_empty(&self) -> bool { self.permissions.is_empty() }

    /// An empty requirement is always satisfied.
    pub fn satisfied_by(&self, grants: &Grants) -> bool {
        if self.is_empty() { return true; }
        match self.mode {
            RequireMode::All => self.permissions.iter().all(|p| grants.allows(p)),
            RequireMode::Any => self.permissions.iter().any(|p| grants.allows(p)),
        }
    }
}

/// Checks the identity the chain attached against a fixed requirement.
///
/// Without an identity the anonymous identity's grants are consulted: routes can be
/// opened to everyone by granting the anonymous group. When those do not suffice the
/// answer is 401 rather than 403, so the chain gets to challenge for credentials.
pub struct PermissionGate {
    permissions: Permissions,
    requirement: PermissionRequirement,
}

impl PermissionGate {
    pub fn new(permissions: Permissions, requirement: PermissionRequirement) -> Self { Self { permissions, requirement } }

    pub fn requirement(&self) -> &PermissionRequirement { &self.requirement }

    pub fn check(&self, ctx: Option<&RequestContext>) -> Result<(), AuthError> {
        if self.requirement.is_empty() { return Ok(()); }
        match ctx.and_then(RequestContext::principal) {
            Some(p) if self.requirement.satisfied_by(&self.permissions.grants_for(p.id)) => Ok(()),
            Some(p) => {
                debug!(user_id = %p.id, required = ?self.requirement.permissions, "permission denied");
                Err(AuthError::Forbidden)
            }
            None if self.requirement.satisfied_by(&self.permissions.grants_for(ANONYMOUS_ID)) => Ok(()),
            None => Err(AuthError::Unauthenticated),
        }
    }
}

/// Middleware: 401 unless the chain attached an identity.
pub async fn auth_required(req: Request, next: Next) -> Response {
    let authed = req.extensions().get::<RequestContext>().is_some_and(RequestContext::is_authenticated);
    if !authed { return AuthError::Unauthenticated.into_response(); }
    next.run(req).await
}

/// Middleware: `axum::middleware::from_fn_with_state(Arc<PermissionGate>, permissions_required)`.
pub async fn permissions_required(State(gate): State<Arc<PermissionGate>>, req: Request, next: Next) -> Response {
    match gate.check(req.extensions().get::<RequestContext>()) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
