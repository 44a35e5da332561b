use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use base64::Engine;
use uuid::Uuid;

use super::principal::Principal;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub principal: Principal,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// Result of looking a token up in the session table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active(Principal),
    Expired,
    Unknown,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionToken, Session>,
    by_user: HashMap<Uuid, HashSet<SessionToken>>,
}

fn gen_token() -> Result<SessionToken, getrandom::Error> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// In-memory session table mapping opaque tokens to identities with an expiry.
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct SessionManager {
    ttl: Duration,
    tables: Arc<RwLock<Tables>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self { Self { ttl, tables: Arc::new(RwLock::new(Tables::default())) } }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn issue(&self, principal: Principal) -> Result<Session, getrandom::Error> {
        let now = Instant::now();
        let sess = Session { token: gen_token()?, principal, issued_at: now, expires_at: now + self.ttl };
        let mut t = self.tables.write();
        t.by_user.entry(sess.principal.id).or_default().insert(sess.token.clone());
        t.sessions.insert(sess.token.clone(), sess.clone());
        tracing::debug!(user_id = %sess.principal.id, ttl_secs = self.ttl.as_secs(), "session.issue");
        Ok(sess)
    }

    pub fn validate(&self, token: &str) -> SessionStatus {
        let now = Instant::now();
        let status = match self.tables.read().sessions.get(token) {
            Some(s) if s.expires_at > now => return SessionStatus::Active(s.principal.clone()),
            Some(_) => SessionStatus::Expired,
            None => SessionStatus::Unknown,
        };
        // expired: drop it so the table doesn't grow without bound
        if status == SessionStatus::Expired { self.remove(token); }
        status
    }

    pub fn logout(&self, token: &str) -> bool { self.remove(token) }

    pub fn revoke_user(&self, user_id: Uuid) -> usize {
        let mut t = self.tables.write();
        let tokens = t.by_user.remove(&user_id).unwrap_or_default();
        let count = tokens.iter().filter(|tok| t.sessions.remove(*tok).is_some()).count();
        tracing::debug!(user_id = %user_id, count, "session.revoke");
        count
    }

    /// Drop every expired session; returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionToken> = self.tables.read().sessions.values()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.token.clone())
            .collect();
        expired.iter().filter(|tok| self.remove(tok)).count()
    }

    pub fn len(&self) -> usize { self.tables.read().sessions.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn remove(&self, token: &str) -> bool {
        let mut t = self.tables.write();
        let Some(sess) = t.sessions.remove(token) else { return false; };
        let emptied = match t.by_user.get_mut(&sess.principal.id) {
            Some(set) => { set.remove(token); set.is_empty() }
            None => false,
        };
        if emptied { t.by_user.remove(&sess.principal.id); }
        true
    }
}
