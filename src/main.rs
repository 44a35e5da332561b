use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::{Extension, Json, Router};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use gatehouse::accounts::{AccountManager, AccountPolicy};
use gatehouse::auth::{AuthChain, BasicAuthProvider, SessionAuthProvider};
use gatehouse::authz::{InMemoryPermissionProvider, PermissionRequirement, Permissions};
use gatehouse::config::GatehouseConfig;
use gatehouse::credentials::{CombinedValidator, JsonCredentialStore};
use gatehouse::identity::{SessionManager, SERVICE_ACCOUNT_PREFIX};
use gatehouse::server::{PluginId, RouteGuard, WebServer};
use gatehouse::RequestContext;

async fn whoami(Extension(ctx): Extension<RequestContext>) -> Json<serde_json::Value> {
    match ctx.principal() {
        Some(p) => Json(serde_json::json!({ "status": "ok", "id": p.id, "name": p.name, "method": ctx.auth_method })),
        None => Json(serde_json::json!({ "status": "ok", "anonymous": true })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).init();

    let config_path = std::env::var("GATEHOUSE_CONFIG").ok().map(PathBuf::from);
    let cfg = GatehouseConfig::load(config_path.as_deref())?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "gatehouse", "gatehouse starting: RUST_LOG='{}', bind={}:{}, data_dir='{}'",
        rust_log, cfg.bind_host, cfg.http_port, cfg.data_dir.display());

    let users = Arc::new(JsonCredentialStore::open(cfg.users_store_path(), "users")?);
    let service_accounts = Arc::new(JsonCredentialStore::open(cfg.service_accounts_store_path(), "serviceaccounts")?);
    let permissions = Permissions::new().with(Arc::new(InMemoryPermissionProvider::default()));
    let sessions = SessionManager::new(cfg.session_ttl());

    let sa_policy = AccountPolicy {
        name_prefix: Some(SERVICE_ACCOUNT_PREFIX.to_string()),
        default_group: Some(cfg.service_account_group.clone()),
    };
    let sa_accounts = AccountManager::new(service_accounts.clone(), permissions.clone(), sa_policy)
        .with_sessions(sessions.clone());
    sa_accounts.setup_anonymous_user(&cfg.anonymous_group)?;
    match sa_accounts.import_provisioning_dir(&cfg.provisioning_dir()) {
        Ok(n) => info!(applied = n, "service account provisioning done"),
        Err(e) => warn!(error = %e, "service account provisioning skipped"),
    }

    let validator = CombinedValidator::new().with("users", users).with("serviceaccounts", service_accounts);
    let chain = AuthChain::new()
        .with(SessionAuthProvider::with_cookie(sessions, cfg.session_cookie.clone()))
        .with(BasicAuthProvider::new(Arc::new(validator), cfg.basic_realm.clone()));

    let server = Arc::new(WebServer::new(chain, permissions));
    let plugin = PluginId::new("gatehouse", "status");
    server.add_routes(&plugin, "/whoami", Router::new().route("/", get(whoami)), RouteGuard::Authenticated)?;
    server.add_routes(
        &plugin,
        "/public",
        Router::new().route("/", get(whoami)),
        RouteGuard::Permissions(PermissionRequirement::all(["gatehouse.status.public"])),
    )?;

    let addr = cfg.bind_addr()?;
    server.serve(addr).await
}
