//! Who is calling: principals, the per-request context the chain fills in, and sessions.

mod principal;
mod session;
mod request_context;

pub use principal::{Principal, ANONYMOUS_ID, SERVICE_ACCOUNT_PREFIX, is_service_account_name, service_account_name};
pub use session::{Session, SessionToken, SessionManager, SessionStatus};
pub use request_context::RequestContext;
