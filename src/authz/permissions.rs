//! Permission grants: per-identity permission strings and group memberships.
//!
//! Grant syntax:
//! - `plugin.read`      exact permission
//! - `plugin.*`         `plugin` itself and everything below it
//! - `*`                everything
//! - `-plugin.admin`    denial; any matching denial beats every grant

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PermissionError;

/// One permission backend. The host may register several; reads are unioned.
pub trait PermissionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn add_user_to_group(&self, user: Uuid, group: &str) -> Result<(), PermissionError>;
    fn remove_user_from_group(&self, user: Uuid, group: &str) -> Result<(), PermissionError>;
    fn groups_for_user(&self, user: Uuid) -> HashSet<String>;

    fn add_user_permissions(&self, user: Uuid, permissions: &[String]) -> Result<(), PermissionError>;
    fn remove_user_permissions(&self, user: Uuid, permissions: &[String]) -> Result<(), PermissionError>;
    fn user_permissions(&self, user: Uuid) -> HashSet<String>;

    fn add_group_permissions(&self, group: &str, permissions: &[String]) -> Result<(), PermissionError>;
    fn group_permissions(&self, group: &str) -> HashSet<String>;
}

#[derive(Default)]
struct Tables {
    user_groups: HashMap<Uuid, HashSet<String>>,
    user_perms: HashMap<Uuid, HashSet<String>>,
    group_perms: HashMap<String, HashSet<String>>,
}

/// Process-local provider; the default backend and the one tests use.
pub struct InMemoryPermissionProvider {
    name: String,
    tables: RwLock<Tables>,
}

impl Default for InMemoryPermissionProvider {
    fn default() -> Self { Self::new("memory") }
}

impl InMemoryPermissionProvider {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), tables: RwLock::new(Tables::default()) } }
}

impl PermissionProvider for InMemoryPermissionProvider {
    fn name(&self) -> &str { &self.name }

    fn add_user_to_group(&self, user: Uuid, group: &str) -> Result<(), PermissionError> {
        self.tables.write().user_groups.entry(user).or_default().insert(group.to_string());
        Ok(())
    }

    fn remove_user_from_group(&self, user: Uuid, group: &str) -> Result<(), PermissionError> {
        let mut t = self.tables.write();
        let emptied = match t.user_groups.get_mut(&user) {
            Some(set) => { set.remove(group); set.is_empty() }
            None => false,
        };
        if emptied { t.user_groups.remove(&user); }
        Ok(())
    }

    fn groups_for_user(&self, user: Uuid) -> HashSet<String> {
        self.tables.read().user_groups.get(&user).cloned().unwrap_or_default()
    }

    fn add_user_permissions(&self, user: Uuid, permissions: &[String]) -> Result<(), PermissionError> {
        self.tables.write().user_perms.entry(user).or_default().extend(permissions.iter().cloned());
        Ok(())
    }

    fn remove_user_permissions(&self, user: Uuid, permissions: &[String]) -> Result<(), PermissionError> {
        let mut t = self.tables.write();
        let emptied = match t.user_perms.get_mut(&user) {
            Some(set) => {
                for p in permissions { set.remove(p); }
                set.is_empty()
            }
            None => false,
        };
        if emptied { t.user_perms.remove(&user); }
        Ok(())
    }

    fn user_permissions(&self, user: Uuid) -> HashSet<String> {
        self.tables.read().user_perms.get(&user).cloned().unwrap_or_default()
    }

    fn add_group_permissions(&self, group: &str, permissions: &[String]) -> Result<(), PermissionError> {
        self.tables.write().group_perms.entry(group.to_string()).or_default().extend(permissions.iter().cloned());
        Ok(())
    }

    fn group_permissions(&self, group: &str) -> HashSet<String> {
        self.tables.read().group_perms.get(group).cloned().unwrap_or_default()
    }
}

/// Does a single (non-negated) grant cover `wanted`?
pub fn grant_matches(granted: &str, wanted: &str) -> bool {
    if granted == "*" || granted == wanted { return true; }
    match granted.strip_suffix(".*") {
        Some(prefix) => wanted == prefix || (wanted.starts_with(prefix) && wanted[prefix.len()..].starts_with('.')),
        None => false,
    }
}

/// Effective grant set of one identity, resolved once and checked many times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants(HashSet<String>);

impl Grants {
    pub fn new(grants: impl IntoIterator<Item = String>) -> Self { Self(grants.into_iter().collect()) }

    pub fn allows(&self, wanted: &str) -> bool {
        let denied = self.0.iter().filter_map(|g| g.strip_prefix('-')).any(|g| grant_matches(g, wanted));
        !denied && self.0.iter().filter(|g| !g.starts_with('-')).any(|g| grant_matches(g, wanted))
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }
}

/// The host's permission service: every registered provider, queried as a union.
///
/// Writes go to the first registered (primary) provider; removal on account
/// deletion sweeps all of them.
#[derive(Clone, Default)]
pub struct Permissions {
    providers: Vec<Arc<dyn PermissionProvider>>,
}

impl Permissions {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn PermissionProvider>] { &self.providers }

    fn primary(&self) -> Result<&Arc<dyn PermissionProvider>, PermissionError> {
        self.providers.first().ok_or(PermissionError::NoProvider)
    }

    pub fn groups_for_user(&self, user: Uuid) -> HashSet<String> {
        self.providers.iter().flat_map(|p| p.groups_for_user(user)).collect()
    }

    pub fn grants_for(&self, user: Uuid) -> Grants {
        let mut all = HashSet::new();
        for p in &self.providers {
            all.extend(p.user_permissions(user));
            for g in p.groups_for_user(user) {
                for q in &self.providers { all.extend(q.group_permissions(&g)); }
            }
        }
        Grants(all)
    }

    pub fn has_permission(&self, user: Uuid, permission: &str) -> bool { self.grants_for(user).allows(permission) }

    pub fn add_user_to_group(&self, user: Uuid, group: &str) -> Result<(), PermissionError> {
        self.primary()?.add_user_to_group(user, group)
    }

    pub fn add_user_permissions(&self, user: Uuid, permissions: &[String]) -> Result<(), PermissionError> {
        self.primary()?.add_user_permissions(user, permissions)
    }

    pub fn add_group_permissions(&self, group: &str, permissions: &[String]) -> Result<(), PermissionError> {
        self.primary()?.add_group_permissions(group, permissions)
    }

    /// Remove every group membership and direct permission of `user` from every
    /// provider. Keeps going past failures and returns them all.
    pub fn remove_all_grants(&self, user: Uuid) -> Vec<PermissionError> {
        let mut failures = Vec::new();
        for p in &self.providers {
            for g in p.groups_for_user(user) {
                if let Err(e) = p.remove_user_from_group(user, &g) {
                    warn!(provider = p.name(), user_id = %user, group = %g, error = %e, "failed to remove group membership");
                    failures.push(e);
                }
            }
            let perms: Vec<String> = p.user_permissions(user).into_iter().collect();
            if perms.is_empty() { continue; }
            if let Err(e) = p.remove_user_permissions(user, &perms) {
                warn!(provider = p.name(), user_id = %user, error = %e, "failed to remove user permissions");
                failures.push(e);
            }
        }
        debug!(user_id = %user, failures = failures.len(), "permissions.remove_all");
        failures
    }
}
