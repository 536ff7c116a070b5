//! Application state for HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use resbus_storage::ResourceStore;

use crate::hooks::HookNotifier;

/// Application state shared across all HTTP handlers.
///
/// # Type Parameters
///
/// * `S` - The storage backend implementing `ResourceStore`
#[derive(Clone)]
pub struct AppState<S: ResourceStore> {
    /// The storage backend.
    pub store: Arc<S>,
    /// Mount prefix under which the resource tree is served.
    pub base_path: String,
    /// Outbound client for the forward leg. No total timeout: forwarded
    /// responses may stream for a long time.
    pub client: reqwest::Client,
    /// Webhook fanout.
    pub notifier: Arc<HookNotifier>,
}

impl<S: ResourceStore> AppState<S> {
    /// Creates application state with default hook fanout settings.
    pub fn new(store: Arc<S>, base_path: impl Into<String>) -> Self {
        Self::with_hook_settings(store, base_path, 64, Duration::from_secs(10))
    }

    /// Creates application state with explicit hook fanout settings.
    pub fn with_hook_settings(
        store: Arc<S>,
        base_path: impl Into<String>,
        max_in_flight: usize,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            store,
            base_path: base_path.into(),
            client: reqwest::Client::new(),
            notifier: Arc::new(HookNotifier::new(max_in_flight, delivery_timeout)),
        }
    }
}
