use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::store::CredentialValidator;
use crate::error::AuthError;

/// Several validators queried as one, in registration order.
///
/// When two members know the same name, the first registered one decides; the
/// collision is logged as a warning. Registration order is therefore part of the
/// deployment configuration (users before service accounts, typically).
#[derive(Clone, Default)]
pub struct CombinedValidator {
    members: Vec<(String, Arc<dyn CredentialValidator>)>,
}

impl CombinedValidator {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, label: impl Into<String>, validator: Arc<dyn CredentialValidator>) -> &mut Self {
        self.members.push((label.into(), validator));
        self
    }

    pub fn with(mut self, label: impl Into<String>, validator: Arc<dyn CredentialValidator>) -> Self {
        self.add(label, validator);
        self
    }

    pub fn len(&self) -> usize { self.members.len() }

    pub fn is_empty(&self) -> bool { self.members.is_empty() }

    fn warn_if_shadowed(&self, winner: usize, name: &str) {
        let shadowed: Vec<&str> = self.members[winner + 1..]
            .iter()
            .filter(|(_, v)| v.has_user_name(name))
            .map(|(l, _)| l.as_str())
            .collect();
        if !shadowed.is_empty() {
            let e = AuthError::AmbiguousIdentity { name: name.to_string() };
            warn!(winner = %self.members[winner].0, shadowed = ?shadowed, "{e}; first registered store wins");
        }
    }
}

impl CredentialValidator for CombinedValidator {
    fn has_user_name(&self, name: &str) -> bool { self.members.iter().any(|(_, v)| v.has_user_name(name)) }

    fn has_user_id(&self, id: Uuid) -> bool { self.members.iter().any(|(_, v)| v.has_user_id(id)) }

    fn validate_by_name(&self, name: &str, secret: &str) -> Option<Uuid> {
        for (i, (_, v)) in self.members.iter().enumerate() {
            if let Some(id) = v.validate_by_name(name, secret) {
                self.warn_if_shadowed(i, name);
                return Some(id);
            }
        }
        None
    }

    fn validate_by_id(&self, id: Uuid, secret: &str) -> Option<Uuid> {
        self.members.iter().find_map(|(_, v)| v.validate_by_id(id, secret))
    }
}
