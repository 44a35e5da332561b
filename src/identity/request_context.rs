use super::Principal;

/// Per-request authentication state, carried in the request extensions.
///
/// The provider chain inserts exactly one of these per request. The principal is
/// set at most once: `attach` refuses to replace an identity that is already there.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    principal: Option<Principal>,
    /// Name of the provider that resolved the principal, for logs and auditing.
    pub auth_method: Option<&'static str>,
}

impl RequestContext {
    pub fn anonymous() -> Self { Self::default() }

    pub fn authenticated(principal: Principal, method: &'static str) -> Self {
        Self { principal: Some(principal), auth_method: Some(method) }
    }

    pub fn principal(&self) -> Option<&Principal> { self.principal.as_ref() }

    pub fn is_authenticated(&self) -> bool { self.principal.is_some() }

    /// Returns false (and changes nothing) if an identity was already attached.
    pub fn attach(&mut self, principal: Principal, method: &'static str) -> bool {
        if self.principal.is_some() { return false; }
        self.principal = Some(principal);
        self.auth_method = Some(method);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn attach_is_set_once() {
        let first = Principal::new(Uuid::new_v4(), "alice");
        let second = Principal::new(Uuid::new_v4(), "bob");
        let mut ctx = RequestContext::anonymous();
        assert!(!ctx.is_authenticated());
        assert!(ctx.attach(first.clone(), "session"));
        assert!(!ctx.attach(second, "basic"));
        assert_eq!(ctx.principal(), Some(&first));
        assert_eq!(ctx.auth_method, Some("session"));
    }
}
