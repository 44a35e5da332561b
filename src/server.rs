//! Plugin-scoped route registration and the HTTP listener.
//!
//! Every plugin owns the prefix `/<group>/<name>`. Routes mounted there always sit
//! behind the provider chain, and optionally behind a gate. The assembled router is
//! rebuilt on every change and cached; the listener dispatches each request to the
//! current cached router, so mounts and unmounts take effect while serving.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::RwLock;
use tower::ServiceExt;
use tracing::{error, info};

use crate::auth::{auth_filter, AuthChain};
use crate::authz::{auth_required, permissions_required, PermissionGate, PermissionRequirement, Permissions};
use crate::error::RouteError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId {
    pub group: String,
    pub name: String,
}

impl PluginId {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self { Self { group: group.into(), name: name.into() } }

    pub fn prefix(&self) -> String { format!("/{}/{}", self.group, self.name) }

    fn check(&self) -> Result<(), RouteError> {
        let bad = |s: &str| s.is_empty() || s.starts_with(':') || s.contains(['/', '{', '}', '*']);
        if bad(&self.group) || bad(&self.name) { return Err(RouteError::IllegalPathSpec(self.prefix())); }
        Ok(())
    }
}

/// What a mount requires beyond passing the provider chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RouteGuard {
    /// Anonymous requests reach the handler (with an anonymous context).
    #[default]
    Open,
    Authenticated,
    Permissions(PermissionRequirement),
}

/// Empty, or an absolute prefix without wildcards, captures or a trailing slash.
/// Segments may not start with `:` (the old capture syntax axum refuses).
pub fn check_path_spec(spec: &str) -> Result<(), RouteError> {
    if spec.is_empty() { return Ok(()); }
    let illegal = !spec.starts_with('/')
        || spec.ends_with('/')
        || spec.contains("//")
        || spec.contains(['*', '{', '}'])
        || spec.split('/').any(|seg| seg.starts_with(':'));
    if illegal { return Err(RouteError::IllegalPathSpec(spec.to_string())); }
    Ok(())
}

#[derive(Clone)]
struct Mount {
    router: Router,
    guard: RouteGuard,
}

pub struct WebServer {
    chain: Arc<AuthChain>,
    permissions: Permissions,
    mounts: RwLock<BTreeMap<(PluginId, String), Mount>>,
    cached: RwLock<Router>,
}

impl WebServer {
    pub fn new(chain: AuthChain, permissions: Permissions) -> Self {
        Self { chain: Arc::new(chain), permissions, mounts: RwLock::new(BTreeMap::new()), cached: RwLock::new(Router::new().fallback(not_found)) }
    }

    pub fn chain(&self) -> &Arc<AuthChain> { &self.chain }

    /// Mount `router` at `/<group>/<name><path_spec>` behind the provider chain.
    ///
    /// The combined router is built before the mount is recorded; if axum refuses
    /// it (two mounts yielding the same concrete route) nothing changes.
    pub fn add_routes(&self, plugin: &PluginId, path_spec: &str, router: Router, guard: RouteGuard) -> Result<(), RouteError> {
        plugin.check()?;
        check_path_spec(path_spec)?;
        let full = format!("{}{}", plugin.prefix(), path_spec);
        let mut mounts = self.mounts.write();
        let key = (plugin.clone(), path_spec.to_string());
        if mounts.contains_key(&key) { return Err(RouteError::AlreadyMounted(full)); }

        let mut candidate = mounts.clone();
        candidate.insert(key, Mount { router, guard });
        let app = self.build(&candidate).map_err(|message| {
            error!(path = %full, %message, "routes rejected");
            RouteError::Conflict { path: full.clone(), message }
        })?;
        *mounts = candidate;
        *self.cached.write() = app;
        info!(path = %full, "routes mounted");
        Ok(())
    }

    /// Returns whether anything was mounted there.
    pub fn remove_routes(&self, plugin: &PluginId, path_spec: &str) -> Result<bool, RouteError> {
        check_path_spec(path_spec)?;
        let mut mounts = self.mounts.write();
        let removed = mounts.remove(&(plugin.clone(), path_spec.to_string())).is_some();
        if removed {
            info!(path = %format!("{}{}", plugin.prefix(), path_spec), "routes removed");
            self.publish(&mounts);
        }
        Ok(removed)
    }

    /// Unmount everything `plugin` registered; returns how many mounts went away.
    pub fn remove_plugin(&self, plugin: &PluginId) -> usize {
        let mut mounts = self.mounts.write();
        let before = mounts.len();
        mounts.retain(|(p, _), _| p != plugin);
        let removed = before - mounts.len();
        if removed > 0 {
            info!(plugin = %plugin.prefix(), removed, "plugin routes removed");
            self.publish(&mounts);
        }
        removed
    }

    /// Path specs currently mounted for `plugin`.
    pub fn mounted(&self, plugin: &PluginId) -> Vec<String> {
        self.mounts.read().keys().filter(|(p, _)| p == plugin).map(|(_, s)| s.clone()).collect()
    }

    fn guarded(&self, mount: &Mount) -> Router {
        let inner = match &mount.guard {
            RouteGuard::Open => mount.router.clone(),
            RouteGuard::Authenticated => mount.router.clone().layer(from_fn(auth_required)),
            RouteGuard::Permissions(req) => {
                let gate = Arc::new(PermissionGate::new(self.permissions.clone(), req.clone()));
                mount.router.clone().layer(from_fn_with_state(gate, permissions_required))
            }
        };
        // Added last, so it runs first.
        inner.layer(from_fn_with_state(self.chain.clone(), auth_filter))
    }

    /// Assemble the full router. axum reports route conflicts by panicking, so the
    /// build runs under `catch_unwind` and a panic comes back as its message.
    fn build(&self, mounts: &BTreeMap<(PluginId, String), Mount>) -> Result<Router, String> {
        catch_unwind(AssertUnwindSafe(|| {
            let mut app = Router::new();
            for ((plugin, spec), mount) in mounts.iter() {
                app = app.nest(&format!("{}{}", plugin.prefix(), spec), self.guarded(mount));
            }
            app.fallback(not_found)
        }))
        .map_err(panic_message)
    }

    /// Swap in the router for `mounts`. Dropping mounts from a set that built
    /// cleanly cannot introduce a conflict; a failure here keeps the old router.
    fn publish(&self, mounts: &BTreeMap<(PluginId, String), Mount>) {
        match self.build(mounts) {
            Ok(app) => *self.cached.write() = app,
            Err(message) => error!(%message, "router rebuild failed, keeping previous routes"),
        }
    }

    /// Snapshot of the routes as currently mounted.
    pub fn router(&self) -> Router { self.cached.read().clone() }

    /// Router that forwards every request to whatever is mounted at the time it arrives.
    pub fn live_router(self: &Arc<Self>) -> Router {
        let server = self.clone();
        Router::new().fallback(move |req: Request| {
            let current = server.router();
            async move {
                match current.oneshot(req).await {
                    Ok(res) => res,
                    Err(never) => match never {},
                }
            }
        })
    }

    pub async fn serve(self: Arc<Self>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, providers = ?self.chain.provider_names(), "gatehouse listening");
        axum::serve(listener, self.live_router()).await?;
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "router build panicked".to_string())
}

/// Plain 404 in the same body shape as the auth errors.
pub async fn not_found() -> Response {
    (axum::http::StatusCode::NOT_FOUND, axum::Json(serde_json::json!({ "status": "not_found" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[test]
    fn path_specs() {
        assert!(check_path_spec("").is_ok());
        assert!(check_path_spec("/api").is_ok());
        assert!(check_path_spec("/api/v1").is_ok());
        assert_eq!(check_path_spec("api"), Err(RouteError::IllegalPathSpec("api".into())));
        assert!(check_path_spec("/api/").is_err());
        assert!(check_path_spec("/").is_err());
        assert!(check_path_spec("/a//b").is_err());
        assert!(check_path_spec("/*").is_err());
        assert!(check_path_spec("/{id}").is_err());
        assert_eq!(check_path_spec("/:id"), Err(RouteError::IllegalPathSpec("/:id".into())));
        assert!(check_path_spec("/api/:version/docs").is_err());
        assert!(check_path_spec("/api/v:1").is_ok());
    }

    #[test]
    fn colon_segments_are_refused_and_registration_keeps_working() {
        let ws = WebServer::new(AuthChain::new(), Permissions::new());
        let p = PluginId::new("acme", "shop");
        let r = || Router::new().route("/", get(|| async { "ok" }));
        assert_eq!(ws.add_routes(&p, "/:id", r(), RouteGuard::Open), Err(RouteError::IllegalPathSpec("/:id".into())));
        assert!(ws.add_routes(&PluginId::new(":acme", "shop"), "", r(), RouteGuard::Open).is_err());
        assert!(ws.mounted(&p).is_empty());

        ws.add_routes(&p, "/ok", r(), RouteGuard::Open).unwrap();
        assert_eq!(ws.mounted(&p), vec!["/ok".to_string()]);
        assert!(ws.remove_routes(&p, "/ok").unwrap());
    }

    #[test]
    fn conflicting_mount_is_rejected_without_poisoning_the_server() {
        let ws = WebServer::new(AuthChain::new(), Permissions::new());
        let p = PluginId::new("acme", "shop");
        let ok = || Router::new().route("/", get(|| async { "ok" }));
        ws.add_routes(&p, "", Router::new().route("/api", get(|| async { "root" })), RouteGuard::Open).unwrap();

        // Same concrete route `/acme/shop/api` from a second mount.
        let err = ws.add_routes(&p, "/api", ok(), RouteGuard::Open).unwrap_err();
        assert!(matches!(err, RouteError::Conflict { ref path, .. } if path == "/acme/shop/api"));
        assert_eq!(ws.mounted(&p), vec!["".to_string()]);

        ws.add_routes(&p, "/other", ok(), RouteGuard::Open).unwrap();
        assert!(ws.remove_routes(&p, "/other").unwrap());
        assert_eq!(ws.remove_plugin(&p), 1);
    }

    #[test]
    fn mount_bookkeeping() {
        let ws = WebServer::new(AuthChain::new(), Permissions::new());
        let p = PluginId::new("acme", "shop");
        let r = || Router::new().route("/", get(|| async { "ok" }));
        ws.add_routes(&p, "/api", r(), RouteGuard::Open).unwrap();
        ws.add_routes(&p, "", r(), RouteGuard::Authenticated).unwrap();
        assert_eq!(
            ws.add_routes(&p, "/api", r(), RouteGuard::Open),
            Err(RouteError::AlreadyMounted("/acme/shop/api".into()))
        );
        assert_eq!(ws.add_routes(&p, "api", r(), RouteGuard::Open), Err(RouteError::IllegalPathSpec("api".into())));
        assert!(ws.add_routes(&PluginId::new("a/b", "c"), "", r(), RouteGuard::Open).is_err());
        assert_eq!(ws.mounted(&p), vec!["".to_string(), "/api".to_string()]);

        assert!(ws.remove_routes(&p, "/api").unwrap());
        assert!(!ws.remove_routes(&p, "/api").unwrap());
        assert_eq!(ws.remove_plugin(&p), 1);
        assert!(ws.mounted(&p).is_empty());
    }
}
