use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use base64::Engine;
use tracing::debug;

use super::provider::{AuthOutcome, AuthProvider, RequestHead};
use crate::credentials::{normalize_username, CredentialValidator};
use crate::error::AuthError;
use crate::identity::Principal;

pub const DEFAULT_REALM: &str = "gatehouse";

/// HTTP Basic authentication against a credential validator.
pub struct BasicAuthProvider {
    validator: Arc<dyn CredentialValidator>,
    realm: String,
}

/// Split an `Authorization` value into user and secret.
/// `Ok(None)` when the scheme is not Basic at all.
pub fn parse_basic(value: &str) -> Result<Option<(String, String)>, AuthError> {
    let value = value.trim();
    let (scheme, payload) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("basic") { return Ok(None); }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| AuthError::InvalidCredentialFormat("payload is not base64".into()))?;
    let text = String::from_utf8(bytes).map_err(|_| AuthError::InvalidCredentialFormat("payload is not utf-8".into()))?;
    let (user, secret) = text
        .split_once(':')
        .ok_or_else(|| AuthError::InvalidCredentialFormat("missing ':' separator".into()))?;
    Ok(Some((user.to_string(), secret.to_string())))
}

impl BasicAuthProvider {
    pub fn new(validator: Arc<dyn CredentialValidator>, realm: impl Into<String>) -> Self {
        Self { validator, realm: realm.into() }
    }

    pub fn realm(&self) -> &str { &self.realm }

    fn challenge_value(&self) -> Option<HeaderValue> {
        let realm = self.realm.replace(['"', '\\'], "");
        HeaderValue::from_str(&format!("Basic realm=\"{realm}\", charset=\"UTF-8\"")).ok()
    }
}

impl AuthProvider for BasicAuthProvider {
    fn name(&self) -> &'static str { "basic" }

    fn authenticate(&self, req: &RequestHead) -> Result<AuthOutcome, AuthError> {
        let Some(raw) = req.headers.get(header::AUTHORIZATION) else { return Ok(AuthOutcome::None) };
        let parsed = raw
            .to_str()
            .map_err(|_| AuthError::InvalidCredentialFormat("authorization header is not ascii".into()))
            .and_then(parse_basic);
        let (user, secret) = match parsed {
            Ok(Some(pair)) => pair,
            Ok(None) => return Ok(AuthOutcome::None),
            Err(e) => {
                debug!(error = %e, "malformed basic credentials");
                return Ok(AuthOutcome::Failure);
            }
        };
        match self.validator.validate_by_name(&user, &secret) {
            Some(id) => Ok(AuthOutcome::Success(Principal::new(id, normalize_username(&user)))),
            None => Ok(AuthOutcome::Failure),
        }
    }

    fn challenge(&self, _req: &RequestHead, res: &mut Response) -> bool {
        if res.status() != StatusCode::UNAUTHORIZED { return false; }
        let Some(value) = self.challenge_value() else { return false };
        res.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        true
    }
}
