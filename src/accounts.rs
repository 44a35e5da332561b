//! Account lifecycle on top of a credential store and the permission service.
//!
//! One manager per store: users get a plain policy, service accounts a policy that
//! prefixes names and puts new accounts into their group. Creation is all-or-nothing;
//! deletion removes the credential first and then sweeps grants best-effort.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::authz::Permissions;
use crate::credentials::CredentialStore;
use crate::error::{AccountError, PermissionError};
use crate::identity::{SessionManager, ANONYMOUS_ID, SERVICE_ACCOUNT_PREFIX};

pub const ANONYMOUS_GROUP: &str = "ANONYMOUS";
pub const SERVICE_ACCOUNT_GROUP: &str = "SERVICE_ACCOUNT";
pub const PROVISIONING_SUFFIX: &str = ".serviceaccount.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPolicy {
    /// Applied to every name handled by the manager, unless already present.
    pub name_prefix: Option<String>,
    /// Group every newly created account joins.
    pub default_group: Option<String>,
}

impl AccountPolicy {
    pub fn users(default_group: Option<String>) -> Self { Self { name_prefix: None, default_group } }

    pub fn service_accounts() -> Self {
        Self { name_prefix: Some(SERVICE_ACCOUNT_PREFIX.to_string()), default_group: Some(SERVICE_ACCOUNT_GROUP.to_string()) }
    }

    pub fn apply(&self, name: &str) -> String {
        match self.name_prefix.as_deref() {
            Some(prefix) if !name.starts_with(prefix) => format!("{prefix}{name}"),
            _ => name.to_string(),
        }
    }
}

/// Shape of a `*.serviceaccount.json` provisioning file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisionedAccount {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn enabled_by_default() -> bool { true }

pub struct AccountManager {
    store: Arc<dyn CredentialStore>,
    permissions: Permissions,
    policy: AccountPolicy,
    sessions: Option<SessionManager>,
}

impl AccountManager {
    pub fn new(store: Arc<dyn CredentialStore>, permissions: Permissions, policy: AccountPolicy) -> Self {
        Self { store, permissions, policy, sessions: None }
    }

    /// Revoke live sessions of deleted accounts.
    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn policy(&self) -> &AccountPolicy { &self.policy }

    pub fn store(&self) -> &Arc<dyn CredentialStore> { &self.store }

    pub fn account_name(&self, name: &str) -> String { self.policy.apply(name) }

    pub fn lookup(&self, name: &str) -> Option<Uuid> { self.store.lookup_identity(&self.account_name(name)) }

    pub fn create_account(&self, name: &str, secret: &str) -> Result<Uuid, AccountError> {
        let id = Uuid::new_v4();
        let name = self.account_name(name);
        self.store.set_credential(id, Some(&name), secret)?;
        self.join_default_group(id, &name)
    }

    /// Like `create_account`, from an already-hashed (PHC) secret.
    pub fn create_account_from_hash(&self, name: &str, password_hash: &str) -> Result<Uuid, AccountError> {
        let id = Uuid::new_v4();
        let name = self.account_name(name);
        self.store.import_credential(id, &name, password_hash)?;
        self.join_default_group(id, &name)
    }

    fn join_default_group(&self, id: Uuid, name: &str) -> Result<Uuid, AccountError> {
        if let Some(group) = self.policy.default_group.as_deref() {
            if let Err(e) = self.permissions.add_user_to_group(id, group) {
                warn!(user_id = %id, group, error = %e, "default group grant failed, rolling back credential");
                if let Err(rb) = self.store.delete_credential_by_id(id) {
                    error!(user_id = %id, error = %rb, "rollback of new credential failed");
                }
                return Err(e.into());
            }
        }
        info!(user_id = %id, name, "account created");
        Ok(id)
    }

    pub fn rotate_secret_by_name(&self, name: &str, secret: &str) -> Result<Uuid, AccountError> {
        let name = self.account_name(name);
        let id = self.store.lookup_identity(&name).ok_or_else(|| AccountError::UnknownName(name.clone()))?;
        self.store.set_credential(id, None, secret)?;
        info!(user_id = %id, "account secret rotated");
        Ok(id)
    }

    pub fn rotate_secret_by_id(&self, id: Uuid, secret: &str) -> Result<(), AccountError> {
        self.store.set_credential(id, None, secret)?;
        info!(user_id = %id, "account secret rotated");
        Ok(())
    }

    /// Delete the credential, end the account's sessions and remove every grant it
    /// holds in every permission provider. Returns whether a credential existed.
    ///
    /// Grant removal keeps going past failures; if any occurred the credential is
    /// still gone and `AccountError::PartialCleanup` lists what was left behind.
    pub fn delete_account(&self, id: Uuid) -> Result<bool, AccountError> {
        let existed = self.store.delete_credential_by_id(id)?;
        if let Some(sessions) = &self.sessions {
            sessions.revoke_user(id);
        }
        let failures = self.permissions.remove_all_grants(id);
        if !failures.is_empty() {
            error!(user_id = %id, failures = failures.len(), "account deleted with leftover grants");
            return Err(AccountError::PartialCleanup { id, failures });
        }
        info!(user_id = %id, existed, "account deleted");
        Ok(existed)
    }

    /// Missing names are nothing to do.
    pub fn delete_account_by_name(&self, name: &str) -> Result<bool, AccountError> {
        match self.lookup(name) {
            Some(id) => self.delete_account(id),
            None => Ok(false),
        }
    }

    /// Put the anonymous identity into `group`, so routes can be opened to
    /// unauthenticated callers through that group's permissions.
    pub fn setup_anonymous_user(&self, group: &str) -> Result<(), PermissionError> {
        self.permissions.add_user_to_group(ANONYMOUS_ID, group)?;
        info!(group, "anonymous identity registered");
        Ok(())
    }

    /// Apply one provisioning document: the named account is always reset, and
    /// recreated with its groups and permissions when enabled. If a grant fails
    /// the new account is deleted again, so it is never left half provisioned.
    pub fn apply_provisioned(&self, doc: &ProvisionedAccount) -> Result<Option<Uuid>, AccountError> {
        self.delete_account_by_name(&doc.name)?;
        if !doc.enabled {
            info!(name = %self.account_name(&doc.name), "provisioned account disabled");
            return Ok(None);
        }
        let hash = doc.password_hash.as_deref().ok_or_else(|| AccountError::Provisioning {
            path: doc.name.clone(),
            message: "enabled account has no PasswordHash".into(),
        })?;
        let id = self.create_account_from_hash(&doc.name, hash)?;
        if let Err(e) = self.grant_provisioned(id, doc) {
            warn!(user_id = %id, error = %e, "provisioned grants failed, rolling back account");
            if let Err(rb) = self.delete_account(id) {
                error!(user_id = %id, error = %rb, "rollback of provisioned account incomplete");
            }
            return Err(e.into());
        }
        Ok(Some(id))
    }

    fn grant_provisioned(&self, id: Uuid, doc: &ProvisionedAccount) -> Result<(), PermissionError> {
        for group in &doc.groups {
            self.permissions.add_user_to_group(id, group)?;
        }
        if !doc.permissions.is_empty() {
            self.permissions.add_user_permissions(id, &doc.permissions)?;
        }
        Ok(())
    }

    pub fn import_provisioning_file(&self, path: &Path) -> Result<Option<Uuid>, AccountError> {
        let prov_err = |message: String| AccountError::Provisioning { path: path.display().to_string(), message };
        let text = std::fs::read_to_string(path).map_err(|e| prov_err(e.to_string()))?;
        let doc: ProvisionedAccount = serde_json::from_str(&text).map_err(|e| prov_err(e.to_string()))?;
        self.apply_provisioned(&doc)
    }

    /// Import every `*.serviceaccount.json` in `dir` (created when missing).
    /// Bad files are logged and skipped; returns how many files were applied.
    pub fn import_provisioning_dir(&self, dir: &Path) -> Result<usize, AccountError> {
        let prov_err = |message: String| AccountError::Provisioning { path: dir.display().to_string(), message };
        std::fs::create_dir_all(dir).map_err(|e| prov_err(e.to_string()))?;
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| prov_err(e.to_string()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(PROVISIONING_SUFFIX)))
            .collect();
        files.sort();

        let mut applied = 0usize;
        for file in files {
            info!(file = %file.display(), "importing service account file");
            match self.import_provisioning_file(&file) {
                Ok(_) => applied += 1,
                Err(e) => error!(file = %file.display(), error = %e, "failed to import service account file"),
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_prefixes_once() {
        let sa = AccountPolicy::service_accounts();
        assert_eq!(sa.apply("ci"), "serviceaccount.ci");
        assert_eq!(sa.apply("serviceaccount.ci"), "serviceaccount.ci");
        assert_eq!(AccountPolicy::users(None).apply("alice"), "alice");
    }

    #[test]
    fn provisioning_document_defaults() {
        let doc: ProvisionedAccount = serde_json::from_str(r#"{"Name":"ci"}"#).unwrap();
        assert!(doc.enabled);
        assert!(doc.password_hash.is_none());
        assert!(doc.groups.is_empty() && doc.permissions.is_empty());
    }
}
