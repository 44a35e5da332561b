//! Authentication: providers, the chain that orders them, and its middleware.

mod provider;
mod chain;
mod session_provider;
mod basic_provider;

pub use provider::{AuthOutcome, AuthProvider, RequestHead};
pub use chain::{auth_filter, AuthChain, Resolution};
pub use session_provider::{SessionAuthProvider, DEFAULT_SESSION_COOKIE};
pub use basic_provider::{parse_basic, BasicAuthProvider, DEFAULT_REALM};
