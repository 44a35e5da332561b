//! gatehouse: request-time authentication and authorization for an embedded web server.
//!
//! Request flow: provider chain ([`auth`]) -> request context ([`identity`]) ->
//! permission gate ([`authz`]) -> plugin handler, all mounted by [`server::WebServer`].

pub mod error;
pub mod identity;
pub mod credentials;
pub mod auth;
pub mod authz;
pub mod accounts;
pub mod config;
pub mod server;

pub use error::{AccountError, AuthError, PermissionError, RouteError, StoreError};
pub use identity::{Principal, RequestContext};
