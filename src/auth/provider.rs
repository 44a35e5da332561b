use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use crate::error::AuthError;
use crate::identity::Principal;

/// Result of one provider looking at one request.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The request carries nothing this provider understands; ask the next one.
    None,
    /// Credentials were presented and rejected. Terminal: the request gets a 401.
    Failure,
    /// The provider wants to answer the request itself (redirect, nonce round trip, ...).
    Challenge(Response),
    Success(Principal),
}

impl AuthOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AuthOutcome::None => "none",
            AuthOutcome::Failure => "failure",
            AuthOutcome::Challenge(_) => "challenge",
            AuthOutcome::Success(_) => "success",
        }
    }

    /// Fold a provider-level error into an outcome.
    pub fn from_error(err: &AuthError) -> Self {
        match err {
            AuthError::NotAttempted => AuthOutcome::None,
            _ => AuthOutcome::Failure,
        }
    }
}

/// The parts of a request providers may look at. Cloned once per request so the
/// body stays with the request that is forwarded downstream.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn from_request<B>(req: &axum::http::Request<B>) -> Self {
        Self { method: req.method().clone(), uri: req.uri().clone(), headers: req.headers().clone() }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of cookie `name`, if the request carries it.
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers.get_all(axum::http::header::COOKIE) {
            let Ok(s) = value.to_str() else { continue };
            for part in s.split(';') {
                if let Some((k, v)) = part.trim().split_once('=') {
                    if k == name { return Some(v.to_string()); }
                }
            }
        }
        None
    }
}

/// One authentication mechanism in the chain.
///
/// Implementations hold no per-request state; they may be called concurrently.
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn authenticate(&self, req: &RequestHead) -> Result<AuthOutcome, AuthError>;

    /// Called when the downstream answered 401. Return true if this provider
    /// amended `res` (e.g. added a `WWW-Authenticate` header).
    fn challenge(&self, _req: &RequestHead, _res: &mut Response) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn head(cookie: &str) -> RequestHead {
        let req = Request::builder().uri("/x").header("cookie", cookie).body(()).unwrap();
        RequestHead::from_request(&req)
    }

    #[test]
    fn cookie_lookup() {
        let h = head("a=1; gatehouse_session=tok=; b=2");
        assert_eq!(h.cookie("gatehouse_session").as_deref(), Some("tok="));
        assert_eq!(h.cookie("b").as_deref(), Some("2"));
        assert_eq!(h.cookie("missing"), None);
    }

    #[test]
    fn errors_fold_to_outcomes() {
        assert!(matches!(AuthOutcome::from_error(&AuthError::NotAttempted), AuthOutcome::None));
        assert!(matches!(AuthOutcome::from_error(&AuthError::InvalidCredentialFormat("x".into())), AuthOutcome::Failure));
        assert!(matches!(AuthOutcome::from_error(&AuthError::Provider("boom".into())), AuthOutcome::Failure));
    }
}
