//! Transparent reverse proxying for forwarded subtrees.
//!
//! A resource with a non-empty forward URL becomes an *anchor*: requests
//! for it or any descendant are tunneled to the forward target with only
//! scheme, host, path and query rewritten. Headers and body pass through
//! unchanged in both directions, minus hop-by-hop headers and the framing
//! headers the HTTP clients manage themselves.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use tracing::{debug, error};
use url::Url;

use resbus_storage::{ResourceHandle, ResourceStore, StorageResult};

use crate::http::AppState;
use crate::http::respond;

/// Finds the shallowest ancestor (or the resource itself) with a
/// non-empty forward URL.
///
/// Scanning stops at the first missing prefix. When the anchor is the
/// requested resource itself *and* the request carries a command, the
/// request targets `_forward`/`_hooks` on the anchor and must not be
/// proxied.
pub async fn find_anchor<S: ResourceStore>(
    store: &S,
    comps: &[String],
    cmds: &[String],
) -> StorageResult<Option<S::Handle>> {
    for i in 1..=comps.len() {
        if !store.resource_exists(&comps[..i]).await? {
            return Ok(None);
        }
        let res = store.get_resource(&comps[..i]).await?;
        let forward = res.get_forward().await?;
        if !forward.is_empty() {
            if i == comps.len() && !cmds.is_empty() {
                return Ok(None);
            }
            return Ok(Some(res));
        }
    }
    Ok(None)
}

/// Proxies a request through the given anchor to its forward target.
///
/// The outgoing URL takes scheme and host from the target, the target
/// path joined with the part of the request path below the anchor, and
/// the concatenation of both query strings.
pub async fn proxy<S: ResourceStore>(
    state: &AppState<S>,
    anchor: &S::Handle,
    req: Request,
) -> Response {
    let uri = req.uri().clone();

    let forward = match anchor.get_forward().await {
        Ok(forward) => forward,
        Err(err) => {
            error!(error = %err, "could not read forward target");
            return respond::plain(StatusCode::INTERNAL_SERVER_ERROR, "Could not get Forward", &uri);
        }
    };
    let target = match Url::parse(&forward.url) {
        Ok(target) => target,
        Err(err) => {
            error!(url = %forward.url, error = %err, "invalid forward target");
            return respond::plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not parse Forward",
                &uri,
            );
        }
    };

    let mount = crate::hooks::notification_path(&state.base_path, anchor.elts());
    let relative = uri.path().strip_prefix(&mount).unwrap_or("");

    let mut out_url = target.clone();
    out_url.set_path(&join_url_paths(target.path(), relative));
    let query = match (target.query(), uri.query()) {
        (Some(t), Some(r)) => Some(format!("{t}&{r}")),
        (Some(t), None) => Some(t.to_string()),
        (None, Some(r)) => Some(r.to_string()),
        (None, None) => None,
    };
    out_url.set_query(query.as_deref());

    debug!(target = %out_url, "forwarding request");

    let (parts, body) = req.into_parts();
    let mut builder = state.client.request(parts.method, out_url);
    for (name, value) in &parts.headers {
        if !skip_request_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    let upstream = builder
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(err) => {
            error!(error = %err, "forward upstream request failed");
            return respond::plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not reach forward target",
                &uri,
            );
        }
    };

    let status = upstream.status();
    let headers = relay_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Joins two URL path segments without doubling slashes.
fn join_url_paths(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        if base.is_empty() {
            return "/".to_string();
        }
        return base.to_string();
    }
    format!("{base}/{relative}")
}

/// Headers not forwarded on the outgoing request: hop-by-hop headers plus
/// the framing headers the outbound client computes itself. `Host` is set
/// from the target URL.
fn skip_request_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

/// Headers not relayed on the response; the server recomputes framing for
/// the streamed body.
fn skip_response_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection" | "keep-alive" | "transfer-encoding" | "content-length" | "trailers"
    )
}

fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if !skip_response_header(name.as_str()) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers
}
