//! Authorization: permission grants and the gates that enforce them after authentication.

mod permissions;
mod gate;

pub use permissions::{grant_matches, Grants, InMemoryPermissionProvider, PermissionProvider, Permissions};
pub use gate::{auth_required, permissions_required, PermissionGate, PermissionRequirement, RequireMode};
