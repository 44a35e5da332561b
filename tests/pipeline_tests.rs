use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use base64::Engine;
use tower::ServiceExt;
use uuid::Uuid;

use gatehouse::auth::{AuthChain, AuthOutcome, AuthProvider, BasicAuthProvider, RequestHead, SessionAuthProvider};
use gatehouse::authz::{InMemoryPermissionProvider, PermissionRequirement, Permissions};
use gatehouse::credentials::{CombinedValidator, CredentialStore, JsonCredentialStore};
use gatehouse::identity::{SessionManager, ANONYMOUS_ID};
use gatehouse::server::{PluginId, RouteGuard, WebServer};
use gatehouse::{AuthError, Principal, RequestContext};

/// Records the principal the handler saw (nil for anonymous) and how often it ran.
#[derive(Clone, Default)]
struct Seen {
    hits: Arc<AtomicUsize>,
    last: Arc<parking_lot::Mutex<Option<Option<Principal>>>>,
}

impl Seen {
    fn router(&self) -> Router {
        let seen = self.clone();
        Router::new().route("/", get(move |Extension(ctx): Extension<RequestContext>| {
            let seen = seen.clone();
            async move {
                seen.hits.fetch_add(1, Ordering::SeqCst);
                *seen.last.lock() = Some(ctx.principal().cloned());
                "handled"
            }
        }))
    }

    fn hits(&self) -> usize { self.hits.load(Ordering::SeqCst) }

    fn principal(&self) -> Option<Principal> { self.last.lock().clone().flatten() }
}

struct Fixture {
    server: WebServer,
    sessions: SessionManager,
    alice: Uuid,
    seen: Seen,
}

fn basic(user: &str, secret: &str) -> String {
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{user}:{secret}")))
}

fn fixture(guard: RouteGuard) -> Fixture {
    let users = Arc::new(JsonCredentialStore::in_memory("users"));
    let alice = Uuid::new_v4();
    users.set_credential(alice, Some("alice"), "wonderland").unwrap();

    let permissions = Permissions::new().with(Arc::new(InMemoryPermissionProvider::default()));
    permissions.add_user_permissions(alice, &["shop.read".to_string()]).unwrap();

    let sessions = SessionManager::default();
    let chain = AuthChain::new()
        .with(SessionAuthProvider::new(sessions.clone()))
        .with(BasicAuthProvider::new(Arc::new(CombinedValidator::new().with("users", users)), "shop"));
    let server = WebServer::new(chain, permissions);
    let seen = Seen::default();
    server.add_routes(&PluginId::new("acme", "shop"), "/items", seen.router(), guard).unwrap();
    Fixture { server, sessions, alice, seen }
}

async fn send(server: &WebServer, req: Request<Body>) -> Response {
    server.router().oneshot(req).await.unwrap()
}

fn get_items() -> axum::http::request::Builder { Request::builder().uri("/acme/shop/items") }

#[tokio::test]
async fn valid_session_reaches_handler_with_identity() {
    let f = fixture(RouteGuard::Authenticated);
    let s = f.sessions.issue(Principal::new(f.alice, "alice")).unwrap();
    let req = get_items().header(header::COOKIE, format!("gatehouse_session={}", s.token)).body(Body::empty()).unwrap();
    let res = send(&f.server, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(f.seen.hits(), 1);
    assert_eq!(f.seen.principal().map(|p| p.id), Some(f.alice));
}

#[tokio::test]
async fn wrong_basic_secret_is_exactly_401_without_handler() {
    let f = fixture(RouteGuard::Open);
    let req = get_items().header(header::AUTHORIZATION, basic("alice", "nope")).body(Body::empty()).unwrap();
    let res = send(&f.server, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(f.seen.hits(), 0);
    // Rejection by the chain is terminal: no challenge header is added.
    assert!(res.headers().get(header::WWW_AUTHENTICATE).is_none());
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, r#"{"status":"unauthorized"}"#.as_bytes());
}

#[tokio::test]
async fn correct_basic_credentials_authenticate() {
    let f = fixture(RouteGuard::Permissions(PermissionRequirement::all(["shop.read"])));
    let req = get_items().header(header::AUTHORIZATION, basic("alice", "wonderland")).body(Body::empty()).unwrap();
    let res = send(&f.server, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(f.seen.principal(), Some(Principal::new(f.alice, "alice")));
}

#[tokio::test]
async fn unknown_session_fails_even_with_good_basic_header() {
    let f = fixture(RouteGuard::Open);
    let req = get_items()
        .header(header::COOKIE, "gatehouse_session=forged")
        .header(header::AUTHORIZATION, basic("alice", "wonderland"))
        .body(Body::empty())
        .unwrap();
    let res = send(&f.server, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(f.seen.hits(), 0);
}

#[tokio::test]
async fn anonymous_on_required_route_gets_basic_challenge() {
    let f = fixture(RouteGuard::Authenticated);
    let res = send(&f.server, get_items().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()[header::WWW_AUTHENTICATE], r#"Basic realm="shop", charset="UTF-8""#);
    assert_eq!(f.seen.hits(), 0);
}

#[tokio::test]
async fn anonymous_on_open_route_is_forwarded_without_identity() {
    let f = fixture(RouteGuard::Open);
    let res = send(&f.server, get_items().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(f.seen.hits(), 1);
    assert_eq!(f.seen.principal(), None);
    assert!(res.headers().get(header::WWW_AUTHENTICATE).is_none());
}

#[tokio::test]
async fn anonymous_permissions_decide_access() {
    let f = fixture(RouteGuard::Permissions(PermissionRequirement::all(["shop.browse"])));
    let res = send(&f.server, get_items().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(f.seen.hits(), 0);

    // Same server, now with the permission granted to the anonymous identity.
    let perms = Permissions::new().with(Arc::new(InMemoryPermissionProvider::default()));
    perms.add_user_to_group(ANONYMOUS_ID, "ANONYMOUS").unwrap();
    perms.add_group_permissions("ANONYMOUS", &["shop.browse".to_string()]).unwrap();
    let server = WebServer::new(AuthChain::new(), perms);
    let seen = Seen::default();
    server
        .add_routes(&PluginId::new("acme", "shop"), "/items", seen.router(),
            RouteGuard::Permissions(PermissionRequirement::all(["shop.browse"])))
        .unwrap();
    let res = send(&server, get_items().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(seen.hits(), 1);
}

#[tokio::test]
async fn authenticated_without_permission_is_403() {
    let f = fixture(RouteGuard::Permissions(PermissionRequirement::all(["shop.read", "shop.write"])));
    let req = get_items().header(header::AUTHORIZATION, basic("alice", "wonderland")).body(Body::empty()).unwrap();
    let res = send(&f.server, req).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(f.seen.hits(), 0);

    let f = fixture(RouteGuard::Permissions(PermissionRequirement::any(["shop.read", "shop.write"])));
    let req = get_items().header(header::AUTHORIZATION, basic("alice", "wonderland")).body(Body::empty()).unwrap();
    assert_eq!(send(&f.server, req).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn unmounted_routes_disappear() {
    let f = fixture(RouteGuard::Open);
    let plugin = PluginId::new("acme", "shop");
    assert_eq!(send(&f.server, get_items().body(Body::empty()).unwrap()).await.status(), StatusCode::OK);
    assert_eq!(f.server.remove_plugin(&plugin), 1);
    assert_eq!(send(&f.server, get_items().body(Body::empty()).unwrap()).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn live_router_follows_mount_changes() {
    let f = fixture(RouteGuard::Open);
    let server = Arc::new(f.server);
    let live = server.live_router();
    let res = live.clone().oneshot(get_items().body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    server.remove_routes(&PluginId::new("acme", "shop"), "/items").unwrap();
    let res = live.oneshot(get_items().body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

/// Provider that always succeeds with a fixed identity and counts calls.
struct Always(&'static str, Principal, Arc<AtomicUsize>);

impl AuthProvider for Always {
    fn name(&self) -> &'static str { self.0 }
    fn authenticate(&self, _req: &RequestHead) -> Result<AuthOutcome, AuthError> {
        self.2.fetch_add(1, Ordering::SeqCst);
        Ok(AuthOutcome::Success(self.1.clone()))
    }
}

struct Broken;

impl AuthProvider for Broken {
    fn name(&self) -> &'static str { "broken" }
    fn authenticate(&self, _req: &RequestHead) -> Result<AuthOutcome, AuthError> {
        Err(AuthError::Provider("backend unavailable".into()))
    }
}

#[tokio::test]
async fn first_success_is_attached_and_later_providers_skipped() {
    let first = Principal::new(Uuid::from_u128(1), "first");
    let second = Principal::new(Uuid::from_u128(2), "second");
    let later_calls = Arc::new(AtomicUsize::new(0));
    let chain = AuthChain::new()
        .with(Always("one", first.clone(), Arc::new(AtomicUsize::new(0))))
        .with(Always("two", second, later_calls.clone()));
    let server = WebServer::new(chain, Permissions::new());
    let seen = Seen::default();
    server.add_routes(&PluginId::new("acme", "shop"), "/items", seen.router(), RouteGuard::Authenticated).unwrap();
    let res = send(&server, get_items().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(seen.principal(), Some(first));
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_error_fails_closed() {
    let later_calls = Arc::new(AtomicUsize::new(0));
    let chain = AuthChain::new()
        .with(Broken)
        .with(Always("fallback", Principal::new(Uuid::from_u128(3), "x"), later_calls.clone()));
    let server = WebServer::new(chain, Permissions::new());
    let seen = Seen::default();
    server.add_routes(&PluginId::new("acme", "shop"), "/items", seen.router(), RouteGuard::Open).unwrap();
    let res = send(&server, get_items().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(seen.hits(), 0);
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

/// Answers every request itself; counts calls to its 401 hook.
struct Redirecting(Arc<AtomicUsize>);

fn redirect_response() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("x-login-url", "https://login.example/start")
        .body(Body::from("go log in"))
        .unwrap()
}

impl AuthProvider for Redirecting {
    fn name(&self) -> &'static str { "redirect" }
    fn authenticate(&self, _req: &RequestHead) -> Result<AuthOutcome, AuthError> {
        Ok(AuthOutcome::Challenge(redirect_response()))
    }
    fn challenge(&self, _req: &RequestHead, _res: &mut Response) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[tokio::test]
async fn challenge_outcome_is_returned_verbatim_without_challenge_hooks() {
    let hooks = Arc::new(AtomicUsize::new(0));
    let users = Arc::new(JsonCredentialStore::in_memory("users"));
    let chain = AuthChain::new()
        .with(Redirecting(hooks.clone()))
        .with(BasicAuthProvider::new(Arc::new(CombinedValidator::new().with("users", users)), "shop"));
    let server = WebServer::new(chain, Permissions::new());
    let seen = Seen::default();
    server.add_routes(&PluginId::new("acme", "shop"), "/items", seen.router(), RouteGuard::Authenticated).unwrap();

    let res = send(&server, get_items().body(Body::empty()).unwrap()).await;
    let expected = redirect_response();
    assert_eq!(res.status(), expected.status());
    assert_eq!(res.headers(), expected.headers());
    assert!(res.headers().get(header::WWW_AUTHENTICATE).is_none());
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "go log in".as_bytes());
    assert_eq!(seen.hits(), 0);
    assert_eq!(hooks.load(Ordering::SeqCst), 0);
}
