//! Ordered evaluation of authentication providers and the axum middleware that runs it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use super::provider::{AuthOutcome, AuthProvider, RequestHead};
use crate::error::AuthError;
use crate::identity::{Principal, RequestContext};

/// Terminal state of one chain evaluation.
#[derive(Debug)]
pub enum Resolution {
    Authenticated { principal: Principal, method: &'static str },
    Anonymous,
    Rejected { provider: &'static str },
    Challenged { provider: &'static str, response: Response },
}

/// Providers consulted in registration order. Immutable once built; share it behind an `Arc`.
#[derive(Clone, Default)]
pub struct AuthChain {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl AuthChain {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, provider: impl AuthProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn push(&mut self, provider: Arc<dyn AuthProvider>) { self.providers.push(provider); }

    pub fn len(&self) -> usize { self.providers.len() }

    pub fn is_empty(&self) -> bool { self.providers.is_empty() }

    pub fn provider_names(&self) -> Vec<&'static str> { self.providers.iter().map(|p| p.name()).collect() }

    /// Run providers until one of them settles the request.
    pub fn resolve(&self, head: &RequestHead) -> Resolution {
        for p in &self.providers {
            let outcome = match catch_unwind(AssertUnwindSafe(|| p.authenticate(head))) {
                Ok(Ok(o)) => o,
                Ok(Err(e)) => {
                    if !matches!(e, AuthError::NotAttempted) {
                        warn!(provider = p.name(), error = %e, "auth provider error, treating as failure");
                    }
                    AuthOutcome::from_error(&e)
                }
                Err(_) => {
                    error!(provider = p.name(), "auth provider panicked, treating as failure");
                    AuthOutcome::Failure
                }
            };
            debug!(provider = p.name(), outcome = outcome.label(), path = %head.uri.path(), "auth.evaluate");
            match outcome {
                AuthOutcome::None => continue,
                AuthOutcome::Success(principal) => return Resolution::Authenticated { principal, method: p.name() },
                AuthOutcome::Failure => return Resolution::Rejected { provider: p.name() },
                AuthOutcome::Challenge(response) => return Resolution::Challenged { provider: p.name(), response },
            }
        }
        Resolution::Anonymous
    }

    /// Offer a 401 response to each provider in turn; returns the one that took it.
    pub fn challenge(&self, head: &RequestHead, res: &mut Response) -> Option<&'static str> {
        for p in &self.providers {
            match catch_unwind(AssertUnwindSafe(|| p.challenge(head, res))) {
                Ok(true) => {
                    debug!(provider = p.name(), path = %head.uri.path(), "auth.challenge");
                    return Some(p.name());
                }
                Ok(false) => {}
                Err(_) => error!(provider = p.name(), "auth provider panicked while challenging"),
            }
        }
        None
    }
}

/// Middleware: `axum::middleware::from_fn_with_state(Arc<AuthChain>, auth_filter)`.
///
/// Always leaves a `RequestContext` in the request extensions of forwarded requests.
/// If an outer chain already authenticated the request it is passed through untouched.
pub async fn auth_filter(State(chain): State<Arc<AuthChain>>, mut req: Request, next: Next) -> Response {
    if req.extensions().get::<RequestContext>().is_some_and(RequestContext::is_authenticated) {
        return next.run(req).await;
    }
    let head = RequestHead::from_request(&req);
    let ctx = match chain.resolve(&head) {
        Resolution::Challenged { response, .. } => return response,
        Resolution::Rejected { provider } => {
            debug!(provider, path = %head.uri.path(), "request rejected");
            return AuthError::AuthenticationFailed.into_response();
        }
        Resolution::Authenticated { principal, method } => RequestContext::authenticated(principal, method),
        Resolution::Anonymous => RequestContext::anonymous(),
    };
    req.extensions_mut().insert(ctx);
    let mut res = next.run(req).await;
    if res.status() == StatusCode::UNAUTHORIZED {
        chain.challenge(&head, &mut res);
    }
    res
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
