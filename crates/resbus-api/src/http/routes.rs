//! Request routing for the resource bus.
//!
//! Every request walks the same state machine: dissect the path against
//! the mount prefix, look for a forward anchor, then either proxy, handle
//! a command (`_hooks`, `_forward`), or dispatch on the resource kind.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

use resbus_storage::{child_name, dissect_path, ResourceHandle, ResourceStore};

use super::respond;
use super::state::AppState;
use crate::forward;
use crate::hooks;
use crate::observability::{metrics_handler, MetricsState};

/// Default request body size limit (1MB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Creates the HTTP router serving the resource tree.
pub fn create_router<S: ResourceStore>(state: AppState<S>) -> Router {
    create_router_with_body_limit(state, DEFAULT_BODY_LIMIT)
}

/// Creates the HTTP router with a custom body size limit.
pub fn create_router_with_body_limit<S: ResourceStore>(
    state: AppState<S>,
    body_limit: usize,
) -> Router {
    let shared_state = Arc::new(state);
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check::<S>))
        .fallback(dispatch::<S>)
        .with_state(shared_state)
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// Creates the HTTP router with a Prometheus `/metrics` endpoint beside
/// the bus.
pub fn create_router_with_observability<S: ResourceStore>(
    state: AppState<S>,
    metrics_state: MetricsState,
    body_limit: usize,
) -> Router {
    let shared_state = Arc::new(state);
    let bus = Router::new()
        .route("/readyz", get(readiness_check::<S>))
        .fallback(dispatch::<S>)
        .with_state(shared_state)
        .layer(RequestBodyLimitLayer::new(body_limit));

    let observability = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_check))
        .with_state(metrics_state);

    bus.merge(observability)
}

// ============================================================
// Health and Readiness Checks
// ============================================================

/// Liveness probe; does not check dependencies.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness probe; pings the storage backend through a root lookup.
async fn readiness_check<S: ResourceStore>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    match state.store.resource_exists(&[]).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready", "checks": { "storage": "ok" } })),
        ),
        Err(err) => {
            error!(error = %err, "readiness check failed: storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(
                    serde_json::json!({ "status": "not_ready", "checks": { "storage": "unavailable" } }),
                ),
            )
        }
    }
}

// ============================================================
// Dispatch
// ============================================================

/// Top-level fallback handler: every path that is not an observability
/// endpoint addresses the resource tree.
async fn dispatch<S: ResourceStore>(
    State(state): State<Arc<AppState<S>>>,
    req: Request,
) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = route_request(&state, req).await;

    let status = response.status().as_u16();
    info!(
        method = %method,
        uri = %uri,
        status,
        elapsed = ?started.elapsed(),
        "request"
    );
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("resbus_http_requests_total", &labels).increment(1);
    metrics::histogram!("resbus_http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
    response
}

async fn route_request<S: ResourceStore>(state: &AppState<S>, req: Request) -> Response {
    let uri = req.uri().clone();
    let (comps, cmds) = match dissect_path(&state.base_path, uri.path()) {
        Ok(split) => split,
        Err(_) => return respond::plain(StatusCode::NOT_FOUND, "Not Found", &uri),
    };

    // A forward anywhere on the path short-circuits local handling.
    let anchor = match forward::find_anchor(state.store.as_ref(), &comps, &cmds).await {
        Ok(anchor) => anchor,
        Err(err) => return respond::storage_error(&err, &uri),
    };
    if let Some(anchor) = anchor {
        return forward::proxy(state, &anchor, req).await;
    }

    let exists = match state.store.resource_exists(&comps).await {
        Ok(exists) => exists,
        Err(err) => return respond::storage_error(&err, &uri),
    };

    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return respond::plain(StatusCode::BAD_REQUEST, "Invalid Request", &uri),
    };
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !exists {
        if !cmds.is_empty() {
            return respond::plain(StatusCode::NOT_FOUND, "Not Found", &uri);
        }
        return handle_inexisting(state, &comps, &parts.method, &uri, &content_type, &body).await;
    }

    let res = match state.store.get_resource(&comps).await {
        Ok(res) => res,
        Err(err) => return respond::storage_error(&err, &uri),
    };

    if !cmds.is_empty() {
        return handle_command(&res, &cmds, &parts.method, &uri, &body).await;
    }
    handle_existing(state, &res, &parts.method, &uri, &content_type, &body).await
}

// ============================================================
// Resource Handlers
// ============================================================

/// Creates an inexisting resource; only PUT is permitted. A body makes
/// the new resource an item, no body makes it a collection.
async fn handle_inexisting<S: ResourceStore>(
    state: &AppState<S>,
    comps: &[String],
    method: &Method,
    uri: &Uri,
    content_type: &str,
    body: &Bytes,
) -> Response {
    if method != &Method::PUT {
        return respond::plain(StatusCode::NOT_FOUND, "Resource not found.", uri);
    }
    let is_item = !body.is_empty();
    let res = match state.store.create_resource(comps, is_item).await {
        Ok(res) => res,
        Err(err) => return respond::storage_error(&err, uri),
    };
    if is_item {
        if let Err(err) = res.set_value(content_type, body).await {
            return respond::storage_error(&err, uri);
        }
        let msg = format!("Put {}!", String::from_utf8_lossy(body));
        return respond::plain(StatusCode::CREATED, &msg, uri);
    }
    respond::plain(StatusCode::CREATED, "Resource created", uri)
}

async fn handle_existing<S: ResourceStore>(
    state: &AppState<S>,
    res: &S::Handle,
    method: &Method,
    uri: &Uri,
    content_type: &str,
    body: &Bytes,
) -> Response {
    match res.is_item().await {
        Ok(true) => handle_item(state, res, method, uri, content_type, body).await,
        Ok(false) => handle_collection(state, res, method, uri, content_type, body).await,
        Err(err) => respond::storage_error(&err, uri),
    }
}

async fn handle_item<S: ResourceStore>(
    state: &AppState<S>,
    res: &S::Handle,
    method: &Method,
    uri: &Uri,
    content_type: &str,
    body: &Bytes,
) -> Response {
    match method.as_str() {
        "GET" => match res.get_value().await {
            Ok((ct, value)) => {
                let mut response = (StatusCode::OK, value).into_response();
                if !ct.is_empty() {
                    if let Ok(value) = HeaderValue::from_str(&ct) {
                        response.headers_mut().insert(header::CONTENT_TYPE, value);
                    }
                }
                response
            }
            Err(err) => respond::storage_error(&err, uri),
        },
        "PUT" => match res.set_value(content_type, body).await {
            Ok(()) => {
                hooks::call_hooks(state, res, "PUT").await;
                let msg = format!("Put {}!", String::from_utf8_lossy(body));
                respond::plain(StatusCode::OK, &msg, uri)
            }
            Err(err) => respond::storage_error(&err, uri),
        },
        "DELETE" => delete_resource(state, res, uri).await,
        _ => respond::plain(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed for items.",
            uri,
        ),
    }
}

async fn handle_collection<S: ResourceStore>(
    state: &AppState<S>,
    res: &S::Handle,
    method: &Method,
    uri: &Uri,
    content_type: &str,
    body: &Bytes,
) -> Response {
    match method.as_str() {
        "GET" => match res.get_children().await {
            Ok(children) => {
                // Child keys are absolute, convert them to relative names.
                let names: Vec<&str> = children.iter().map(|key| child_name(key)).collect();
                respond::json(&names, uri)
            }
            Err(err) => respond::storage_error(&err, uri),
        },
        "POST" => match res.add_to_collection(content_type, body).await {
            Ok(name) => {
                hooks::call_hooks(state, res, "POST").await;
                respond::created(uri, &name)
            }
            Err(err) => respond::storage_error(&err, uri),
        },
        // The handle rejects values on collections; surfaces as 409.
        "PUT" => match res.set_value(content_type, body).await {
            Ok(()) => {
                hooks::call_hooks(state, res, "PUT").await;
                let msg = format!("Put {}!", String::from_utf8_lossy(body));
                respond::plain(StatusCode::OK, &msg, uri)
            }
            Err(err) => respond::storage_error(&err, uri),
        },
        "DELETE" => delete_resource(state, res, uri).await,
        _ => respond::plain(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed for collection.",
            uri,
        ),
    }
}

/// Deletes an item or collection. Hooks fire before the delete executes,
/// while the resource still exists.
async fn delete_resource<S: ResourceStore>(
    state: &AppState<S>,
    res: &S::Handle,
    uri: &Uri,
) -> Response {
    hooks::call_hooks(state, res, "DELETE").await;
    match res.delete().await {
        Ok(()) => respond::plain(StatusCode::OK, "Item deleted!", uri),
        Err(err) => respond::storage_error(&err, uri),
    }
}

// ============================================================
// Command Handlers
// ============================================================

async fn handle_command<H: ResourceHandle>(
    res: &H,
    cmds: &[String],
    method: &Method,
    uri: &Uri,
    body: &Bytes,
) -> Response {
    match cmds[0].as_str() {
        "_hooks" => handle_hook_command(res, cmds, method, uri, body).await,
        "_forward" => handle_forward_command(res, cmds, method, uri, body).await,
        _ => respond::plain(StatusCode::NOT_FOUND, "Not Found", uri),
    }
}

/// CRUD on the hooks of a resource. The command length selects between
/// the hook collection (`_hooks`) and a single hook (`_hooks/{id}`).
async fn handle_hook_command<H: ResourceHandle>(
    res: &H,
    cmds: &[String],
    method: &Method,
    uri: &Uri,
    body: &Bytes,
) -> Response {
    match method.as_str() {
        "GET" => match cmds.len() {
            1 => match res.get_hook_ids().await {
                Ok(ids) => respond::json(&ids, uri),
                Err(err) => respond::storage_error(&err, uri),
            },
            2 => match res.get_hook(&cmds[1]).await {
                Ok(hook) => respond::json(&hook, uri),
                Err(err) => respond::storage_error(&err, uri),
            },
            _ => respond::plain(
                StatusCode::NOT_FOUND,
                "Hooks do not have sub-elements.",
                uri,
            ),
        },
        "POST" => {
            if cmds.len() != 1 {
                return respond::plain(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Method not allowed for hooks.",
                    uri,
                );
            }
            match res.add_hook(body).await {
                Ok(id) => respond::created(uri, &id),
                Err(err) => respond::storage_error(&err, uri),
            }
        }
        "PUT" => {
            if cmds.len() != 2 {
                return respond::plain(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Put only allowed on existing hooks.",
                    uri,
                );
            }
            // New hooks have to be created with POST.
            if let Err(err) = res.get_hook(&cmds[1]).await {
                return respond::storage_error(&err, uri);
            }
            match res.set_hook(&cmds[1], body).await {
                Ok(()) => respond::plain(StatusCode::OK, "Hook updated.", uri),
                Err(err) => respond::storage_error(&err, uri),
            }
        }
        "DELETE" => {
            if cmds.len() != 2 {
                return respond::plain(StatusCode::NOT_FOUND, "Not Found", uri);
            }
            match res.delete_hook(&cmds[1]).await {
                Ok(()) => respond::plain(StatusCode::OK, "Deleted", uri),
                Err(err) => respond::storage_error(&err, uri),
            }
        }
        _ => respond::plain(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed for hooks.",
            uri,
        ),
    }
}

/// CRUD on the forward of a resource. The forward has no sub-elements;
/// any longer command path is unknown.
async fn handle_forward_command<H: ResourceHandle>(
    res: &H,
    cmds: &[String],
    method: &Method,
    uri: &Uri,
    body: &Bytes,
) -> Response {
    if cmds.len() != 1 {
        return respond::plain(StatusCode::NOT_FOUND, "Not Found", uri);
    }
    match method.as_str() {
        "GET" => match res.get_forward().await {
            Ok(forward) => respond::json(&forward, uri),
            Err(err) => respond::storage_error(&err, uri),
        },
        "PUT" => match res.set_forward(body).await {
            Ok(()) => respond::plain(StatusCode::OK, "Forward put.", uri),
            Err(err) => respond::storage_error(&err, uri),
        },
        "DELETE" => match res.delete_forward().await {
            Ok(()) => respond::plain(StatusCode::OK, "Forward Deleted", uri),
            Err(err) => respond::storage_error(&err, uri),
        },
        _ => respond::plain(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed for forwards.",
            uri,
        ),
    }
}
