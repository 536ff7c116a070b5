//! Webhook fanout.
//!
//! When a resource is mutated, every hook registered on it receives a JSON
//! `HookEvent` by POST. The event list is assembled synchronously before
//! the HTTP response is emitted, so a client that observes its request
//! completing can rely on happens-before with respect to delivery start;
//! the deliveries themselves are detached tasks. One attempt per hook, no
//! retry: failures are logged and never affect the originating request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use resbus_storage::{Hook, ResourceHandle, ResourceStore};

use crate::http::AppState;

/// Notification payload sent to each hook URL on a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEvent {
    /// Client-supplied hook name.
    pub name: String,
    /// HTTP method of the mutation: PUT, POST or DELETE.
    pub method: String,
    /// Whether the affected resource is an item or a collection.
    pub item: bool,
    /// Path of the modified resource relative to the server.
    pub path: String,
}

/// Dispatches hook deliveries as detached tasks with bounded concurrency.
pub struct HookNotifier {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl HookNotifier {
    /// Creates a notifier allowing at most `max_in_flight` concurrent
    /// deliveries, each bounded by `delivery_timeout`.
    pub fn new(max_in_flight: usize, delivery_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(delivery_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Spawns one delivery task per hook. Returns immediately.
    pub fn dispatch(&self, hooks: Vec<Hook>, method: &str, item: bool, path: &str) {
        for hook in hooks {
            let event = HookEvent {
                name: hook.name,
                method: method.to_string(),
                item,
                path: path.to_string(),
            };
            let url = hook.url;
            let client = self.client.clone();
            let permits = Arc::clone(&self.permits);
            tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return, // notifier dropped
                };
                match client.post(&url).json(&event).send().await {
                    Ok(response) if !response.status().is_success() => {
                        warn!(
                            hook = %event.name,
                            url = %url,
                            status = response.status().as_u16(),
                            "hook delivery rejected"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(hook = %event.name, url = %url, error = %err, "hook delivery failed");
                    }
                }
            });
        }
    }
}

/// Joins the mount prefix and path components into a server-relative path.
pub(crate) fn notification_path(base_path: &str, elts: &[String]) -> String {
    let base = base_path.trim_end_matches('/');
    if elts.is_empty() {
        if base.is_empty() {
            return "/".to_string();
        }
        return base.to_string();
    }
    format!("{}/{}", base, elts.join("/"))
}

/// Reads the hook list of a resource and dispatches one event per hook.
///
/// The reads happen before this function returns; only the deliveries are
/// detached. Read failures are logged and swallowed, a mutation never
/// fails because its observers can not be enumerated.
pub async fn call_hooks<S: ResourceStore>(state: &AppState<S>, res: &S::Handle, method: &str) {
    let path = notification_path(&state.base_path, res.elts());
    let hooks = match res.get_hooks().await {
        Ok(hooks) => hooks,
        Err(err) => {
            warn!(path = %path, error = %err, "could not read hooks");
            return;
        }
    };
    if hooks.is_empty() {
        return;
    }
    let item = match res.is_item().await {
        Ok(item) => item,
        Err(err) => {
            warn!(path = %path, error = %err, "could not read resource kind");
            return;
        }
    };
    state.notifier.dispatch(hooks, method, item, &path);
}
