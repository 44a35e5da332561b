use tracing::debug;

use super::provider::{AuthOutcome, AuthProvider, RequestHead};
use crate::error::AuthError;
use crate::identity::{SessionManager, SessionStatus};

pub const DEFAULT_SESSION_COOKIE: &str = "gatehouse_session";

/// Resolves the identity from a session cookie.
///
/// No cookie means the request never claimed a session, so the next provider gets
/// a turn. A cookie that does not name a live session is a rejected claim.
pub struct SessionAuthProvider {
    sessions: SessionManager,
    cookie: String,
}

impl SessionAuthProvider {
    pub fn new(sessions: SessionManager) -> Self { Self::with_cookie(sessions, DEFAULT_SESSION_COOKIE) }

    pub fn with_cookie(sessions: SessionManager, cookie: impl Into<String>) -> Self {
        Self { sessions, cookie: cookie.into() }
    }

    pub fn cookie_name(&self) -> &str { &self.cookie }
}

impl AuthProvider for SessionAuthProvider {
    fn name(&self) -> &'static str { "session" }

    fn authenticate(&self, req: &RequestHead) -> Result<AuthOutcome, AuthError> {
        let Some(token) = req.cookie(&self.cookie).filter(|t| !t.is_empty()) else {
            return Ok(AuthOutcome::None);
        };
        match self.sessions.validate(&token) {
            SessionStatus::Active(p) => Ok(AuthOutcome::Success(p)),
            status => {
                debug!(?status, "session cookie did not resolve");
                Ok(AuthOutcome::Failure)
            }
        }
    }
}
