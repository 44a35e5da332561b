use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name prefix that marks automation (service) accounts.
pub const SERVICE_ACCOUNT_PREFIX: &str = "serviceaccount.";

/// The reserved all-zero identity used for unauthenticated requests.
pub const ANONYMOUS_ID: Uuid = Uuid::nil();

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Principal {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
}

impl Principal {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self { Self { id, name: name.into() } }

    pub fn anonymous() -> Self { Self { id: ANONYMOUS_ID, name: String::new() } }

    pub fn is_anonymous(&self) -> bool { self.id.is_nil() }

    pub fn is_service_account(&self) -> bool { is_service_account_name(&self.name) }
}

pub fn is_service_account_name(name: &str) -> bool { name.starts_with(SERVICE_ACCOUNT_PREFIX) }

/// Apply the service-account prefix unless it is already there.
pub fn service_account_name(name: &str) -> String {
    if is_service_account_name(name) { name.to_string() } else { format!("{SERVICE_ACCOUNT_PREFIX}{name}") }
}
