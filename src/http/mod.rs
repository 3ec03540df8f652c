//! HTTP + WebSocket surface. Grounded on `server/handler.go` (the
//! `/v1/sync/{workspace_id}` upgrade and `/v1/presence/{workspace_id}`
//! routes) and `server/health.go` (`/healthz`, `/readyz`), rebuilt on
//! `hyper` 0.14 + `hyper-tungstenite` instead of `net/http` + gorilla
//! websocket, with `matchit` doing the route-param extraction the Go
//! original did by hand with `strings.Split`. `/v1/stats` and
//! `/v1/presence/{workspace_id}` sit behind a short-lived `moka` response
//! cache, matching the teacher's `AppState.cache` pattern in
//! `native-server`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use matchit::Router;
use moka::future::Cache;

use crate::auth::Authenticator;
use crate::engine::Engine;
use crate::presence::PresenceManager;
use crate::session::{self, SessionContext};
use crate::store::Store;
use crate::webhook::WebhookDispatcher;

/// Short enough that an operator watching `/v1/stats` during an incident
/// still sees near-live numbers; long enough to absorb a dashboard
/// hammering the endpoint every few hundred milliseconds.
const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(1);

pub struct AppState {
    pub engine: Arc<Engine>,
    pub presence: Arc<PresenceManager>,
    pub webhook: Arc<WebhookDispatcher>,
    pub authenticator: Arc<Authenticator>,
    pub store: Arc<dyn Store>,
    pub started_at: Instant,
    pub stats_cache: Cache<(), Arc<serde_json::Value>>,
    pub presence_cache: Cache<String, Arc<serde_json::Value>>,
}

impl AppState {
    /// Builds the two read-mostly response caches. Both use the same
    /// short TTL; a `workspace_id`'s presence entry is cheap to recompute,
    /// so eviction pressure never matters here, only staleness does.
    pub fn new_response_caches() -> (Cache<(), Arc<serde_json::Value>>, Cache<String, Arc<serde_json::Value>>) {
        let stats_cache = Cache::builder().time_to_live(RESPONSE_CACHE_TTL).build();
        let presence_cache = Cache::builder()
            .time_to_live(RESPONSE_CACHE_TTL)
            .max_capacity(10_000)
            .build();
        (stats_cache, presence_cache)
    }
}

#[derive(Clone, Copy)]
enum RouteKind {
    Presence,
    History,
    Sync,
}

fn router() -> Router<RouteKind> {
    let mut router = Router::new();
    router.insert("/v1/presence/{workspace_id}", RouteKind::Presence).unwrap();
    router.insert("/v1/history/{workspace_id}", RouteKind::History).unwrap();
    router.insert("/v1/sync/{workspace_id}", RouteKind::Sync).unwrap();
    router
}

pub async fn serve(addr: std::net::SocketAddr, state: Arc<AppState>, shutdown: impl std::future::Future<Output = ()>) -> crate::error::Result<()> {
    let router = Arc::new(router());

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        let router = router.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, state.clone(), router.clone())
            }))
        }
    });

    let server = Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown);

    server
        .await
        .map_err(|e| crate::error::SyncError::Internal(e.to_string()))
}

async fn handle(mut req: Request<Body>, state: Arc<AppState>, router: Arc<Router<RouteKind>>) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();

    if path == "/healthz" {
        return Ok(handle_healthz(&state));
    }
    if path == "/readyz" {
        return Ok(handle_readyz(&state));
    }
    if path == "/v1/stats" {
        return Ok(handle_stats(&state).await);
    }

    let matched = match router.at(&path) {
        Ok(m) => m,
        Err(_) => return Ok(not_found()),
    };

    let workspace_id = matched.params.get("workspace_id").unwrap_or_default().to_string();

    match matched.value {
        RouteKind::Presence if req.method() == Method::GET => Ok(handle_presence(&state, &workspace_id).await),
        RouteKind::History if req.method() == Method::GET => Ok(handle_history(&state, &workspace_id)),
        RouteKind::Sync => handle_sync_upgrade(&mut req, state, workspace_id).await,
        _ => Ok(method_not_allowed()),
    }
}

fn handle_healthz(state: &AppState) -> Response<Body> {
    let uptime = state.started_at.elapsed().as_secs();
    let body = serde_json::json!({
        "status": "ok",
        "timestamp": rfc3339_now(),
        "uptime": format!("{uptime}s"),
    });
    json_response(StatusCode::OK, body)
}

fn handle_readyz(state: &AppState) -> Response<Body> {
    let (status, check) = match state.store.ping() {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("unhealthy: {e}")),
    };
    let body = serde_json::json!({
        "status": if status == StatusCode::OK { "ok" } else { "unhealthy" },
        "timestamp": rfc3339_now(),
        "checks": { "store": check },
    });
    json_response(status, body)
}

async fn handle_stats(state: &AppState) -> Response<Body> {
    if let Some(cached) = state.stats_cache.get(&()).await {
        return json_response(StatusCode::OK, (*cached).clone());
    }

    let bus_stats = state.engine.bus().stats();
    let engine_stats = match state.engine.stats() {
        Ok(s) => s,
        Err(e) => return json_response(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({"error": e.to_string()})),
    };
    let body = serde_json::json!({
        "connections": { "active_topics": bus_stats.active_topics, "total_subscribers": bus_stats.total_subscribers },
        "persistence": { "workspaces": engine_stats.store.workspaces, "keys": engine_stats.store.keys, "strategy": engine_stats.strategy },
        "server_time": rfc3339_now(),
    });
    state.stats_cache.insert((), Arc::new(body.clone())).await;
    json_response(StatusCode::OK, body)
}

async fn handle_presence(state: &AppState, workspace_id: &str) -> Response<Body> {
    if let Some(cached) = state.presence_cache.get(workspace_id).await {
        return json_response(StatusCode::OK, (*cached).clone());
    }

    let users = state.presence.get_users(workspace_id);
    let body = serde_json::to_value(users).unwrap_or_default();
    state
        .presence_cache
        .insert(workspace_id.to_string(), Arc::new(body.clone()))
        .await;
    json_response(StatusCode::OK, body)
}

fn handle_history(state: &AppState, workspace_id: &str) -> Response<Body> {
    match state.engine.get_history(workspace_id) {
        Ok(history) => json_response(StatusCode::OK, serde_json::to_value(history).unwrap_or_default()),
        Err(e) => json_response(StatusCode::BAD_REQUEST, serde_json::json!({"error": e.to_string()})),
    }
}

async fn handle_sync_upgrade(req: &mut Request<Body>, state: Arc<AppState>, workspace_id: String) -> Result<Response<Body>, Infallible> {
    if !hyper_tungstenite::is_upgrade_request(req) {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from("expected websocket upgrade"))
            .unwrap());
    }

    let query_token = req.uri().query().and_then(|q| extract_query_param(q, "token"));
    let header_auth = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let token = Authenticator::extract_token(header_auth.as_deref(), query_token.as_deref());
    let principal = match token.and_then(|t| state.authenticator.authenticate(t).ok()) {
        Some(p) => p,
        None => {
            return Ok(Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::from("missing or invalid token"))
                .unwrap())
        }
    };

    let (mut response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok(pair) => pair,
        Err(e) => {
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::from(format!("upgrade failed: {e}")))
                .unwrap())
        }
    };

    let session_id = session::new_session_id();
    response
        .headers_mut()
        .insert("X-Session-Id", session_id.parse().unwrap());

    let ctx = SessionContext {
        engine: state.engine.clone(),
        presence: state.presence.clone(),
        webhook: state.webhook.clone(),
        workspace_id,
        principal,
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws_stream) => session::run(ws_stream, ctx, session_id).await,
            Err(e) => tracing::warn!(error = %e, "websocket handshake failed"),
        }
    });

    Ok(response)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap()
}

fn method_not_allowed() -> Response<Body> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .body(Body::empty())
        .unwrap()
}

fn rfc3339_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Query token fallback exists because many browser duplex clients
/// cannot set headers; avoids pulling in a full URL query-string crate
/// for one parameter.
fn extract_query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == key {
            Some(v.to_string())
        } else {
            None
        }
    })
}
