//! Error model for the request pipeline and the stores behind it.
//! `AuthError` is the request-path taxonomy; the others belong to the component that raises them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

/// Request-path errors. Provider-level variants never reach the client directly:
/// the chain maps them to an outcome and answers with a uniform body.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credential format: {0}")]
    InvalidCredentialFormat(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("authentication not attempted")]
    NotAttempted,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("credential store error: {0}")]
    StoreIo(#[from] StoreError),
    #[error("user {name} is defined by more than one store")]
    AmbiguousIdentity { name: String },
    #[error("provider error: {0}")]
    Provider(String),
}

impl AuthError {
    /// Map to HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentialFormat(_)
            | AuthError::AuthenticationFailed
            | AuthError::NotAttempted
            | AuthError::Unauthenticated
            | AuthError::AmbiguousIdentity { .. }
            | AuthError::Provider(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::StoreIo(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Body label; deliberately coarse so clients cannot tell rejection reasons apart.
    pub fn status_label(&self) -> &'static str {
        match self.http_status() {
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::FORBIDDEN => "forbidden",
            _ => "error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.http_status(), Json(serde_json::json!({ "status": self.status_label() }))).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed credential file {path}: {source}")]
    Serde { path: String, #[source] source: serde_json::Error },
    #[error("no credential record for {0}")]
    NotFound(Uuid),
    #[error("username {name} already belongs to {owner}")]
    NameTaken { name: String, owner: Uuid },
    #[error("username must not be empty")]
    EmptyName,
    #[error("invalid password hash: {0}")]
    InvalidHash(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("permission provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
    #[error("no permission provider registered")]
    NoProvider,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("no account named {0}")]
    UnknownName(String),
    /// Credential removed, but some grants could not be. The deletion itself stands.
    #[error("account {id} deleted but {} grant removal(s) failed", .failures.len())]
    PartialCleanup { id: Uuid, failures: Vec<PermissionError> },
    #[error("provisioning file {path}: {message}")]
    Provisioning { path: String, message: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("illegal path spec (must be empty or '/'-prefixed, no captures or wildcards): {0}")]
    IllegalPathSpec(String),
    #[error("routes already mounted at {0}")]
    AlreadyMounted(String),
    #[error("routes at {path} conflict with mounted routes: {message}")]
    Conflict { path: String, message: String },
}
