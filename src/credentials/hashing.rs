use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use once_cell::sync::Lazy;
use password_hash::{PasswordHash, SaltString};

use crate::error::StoreError;

/// Hash verified when a user does not exist, so a miss costs the same as a wrong password.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("gatehouse-timing-equalizer").ok());

pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| StoreError::Hash(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| StoreError::Hash(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::Hash(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Constant-time check of `password` against a PHC string. Unparseable hashes never match.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Burn one verification against the dummy hash; always false.
pub fn verify_against_dummy(password: &str) -> bool {
    if let Some(h) = DUMMY_HASH.as_deref() { let _ = verify_password(h, password); }
    false
}

/// Reject pre-hashed secrets that could never verify.
pub fn check_phc(hash: &str) -> Result<(), StoreError> {
    let parsed = PasswordHash::new(hash).map_err(|e| StoreError::InvalidHash(e.to_string()))?;
    if parsed.hash.is_none() { return Err(StoreError::InvalidHash("missing hash output".into())); }
    Ok(())
}
