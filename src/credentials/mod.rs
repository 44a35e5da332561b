//! Identity stores and the validators that check secrets against them.

mod hashing;
mod store;
mod json_store;
mod combined;

pub use hashing::{hash_password, verify_password};
pub use store::{CredentialRecord, CredentialStore, CredentialValidator, normalize_username};
pub use json_store::JsonCredentialStore;
pub use combined::CombinedValidator;
