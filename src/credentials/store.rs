use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::StoreError;

/// One persisted credential. Exactly one per identity per store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    pub uuid: Uuid,
    pub username: String,
    pub password_hash: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Mutating side of an identity store.
pub trait CredentialStore: Send + Sync {
    /// Upsert; `None` keeps the identity's current name.
    fn set_credential(&self, id: Uuid, name: Option<&str>, secret: &str) -> Result<(), StoreError>;
    /// Upsert from an already-hashed secret (PHC string).
    fn import_credential(&self, id: Uuid, name: &str, pre_hashed: &str) -> Result<(), StoreError>;
    /// Returns whether a record was removed; a missing record is not an error.
    fn delete_credential_by_id(&self, id: Uuid) -> Result<bool, StoreError>;
    fn delete_credential_by_name(&self, name: &str) -> Result<bool, StoreError>;
    fn lookup_identity(&self, name: &str) -> Option<Uuid>;
    fn lookup_name(&self, id: Uuid) -> Option<String>;
}

/// Read-only decision side: resolve a claimed identity plus secret to an identity.
pub trait CredentialValidator: Send + Sync {
    fn has_user_name(&self, name: &str) -> bool;
    fn has_user_id(&self, id: Uuid) -> bool;
    fn validate_by_name(&self, name: &str, secret: &str) -> Option<Uuid>;
    fn validate_by_id(&self, id: Uuid, secret: &str) -> Option<Uuid>;
}

/// Canonical form used for storing and looking up usernames.
pub fn normalize_username(name: &str) -> String { name.trim().nfc().collect() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_nfc_and_trimmed() {
        // "é" precomposed vs e + combining acute
        assert_eq!(normalize_username("  caf\u{00e9} "), normalize_username("cafe\u{0301}"));
        assert_eq!(normalize_username("alice"), "alice");
    }

    #[test]
    fn record_defaults_timestamp() {
        let rec: CredentialRecord = serde_json::from_str(&format!(
            r#"{{"uuid":"{}","username":"a","password_hash":"h"}}"#, Uuid::nil()
        )).unwrap();
        assert_eq!(rec.username, "a");
    }
}
