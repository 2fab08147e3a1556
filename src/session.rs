//! Session context: everything one rendered UI instance is allowed to touch.
//!
//! The UI receives a `SessionContext` and nothing else. It reads and writes
//! its own namespaced state through the cache accessors and reaches the
//! backend only through the proxy operations below. The context outlives
//! disposal safely: after `dispose()` state accessors go quiet and proxy
//! results are no longer opened.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::host::{DocumentOpener, Notifier};
use crate::proxy::{ApiProxy, BackendTarget};
use crate::session_cache::SessionCache;
use crate::transport::RawResponse;

pub const DEFAULT_TITLE: &str = "Onyx";

/// Host-side collaborators shared by every instance.
#[derive(Clone)]
pub struct HostServices {
    pub proxy: Arc<ApiProxy>,
    pub documents: Arc<dyn DocumentOpener>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct SessionContext {
    name: String,
    version: String,
    enabled: bool,
    title: RwLock<String>,
    cache: SessionCache,
    services: HostServices,
}

/// Forwards to the host opener only while the instance is alive.
struct LiveOpener<'a> {
    cache: &'a SessionCache,
    documents: &'a dyn DocumentOpener,
}

impl DocumentOpener for LiveOpener<'_> {
    fn open(&self, path: &str) {
        if self.cache.is_disposed() {
            tracing::debug!(path, "Instance disposed; not opening document");
            return;
        }
        self.documents.open(path);
    }
}

impl SessionContext {
    pub fn new(
        name: impl Into<String>,
        cache: SessionCache,
        services: HostServices,
        version: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled,
            title: RwLock::new(DEFAULT_TITLE.to_string()),
            cache,
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extension version, captured once at construction.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the backend had Onyx credentials when this instance was created.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn title(&self) -> String {
        self.title.read().clone()
    }

    pub fn set_title(&self, title: &str) {
        *self.title.write() = title.to_string();
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    // -- State accessors --

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn set(&self, key: &str, value: Value) {
        self.cache.set(key, value);
    }

    // -- Backend access --

    pub async fn route_request(&self, route: &str) -> Result<RawResponse, ProxyError> {
        self.route_request_to(route, BackendTarget::Primary).await
    }

    pub async fn route_request_to(
        &self,
        route: &str,
        target: BackendTarget,
    ) -> Result<RawResponse, ProxyError> {
        self.services.proxy.route_request(route, target).await
    }

    /// Resolve an `s3://` URI to a local copy and open it.
    pub async fn resolve_remote_object(&self, uri: &str) -> Result<(), ProxyError> {
        let result = self
            .services
            .proxy
            .resolve_remote_object(uri, &self.live_opener())
            .await;
        self.report("open", uri, result)
    }

    /// Write `content` to `path` server-side and open the written file.
    pub async fn write_remote_file(&self, path: &str, content: &str) -> Result<(), ProxyError> {
        let result = self
            .services
            .proxy
            .write_remote_file(path, content, &self.live_opener())
            .await;
        self.report("write", path, result)
    }

    fn live_opener(&self) -> LiveOpener<'_> {
        LiveOpener {
            cache: &self.cache,
            documents: self.services.documents.as_ref(),
        }
    }

    /// Explicit user actions surface their failures as a notification.
    fn report(
        &self,
        action: &str,
        target: &str,
        result: Result<String, ProxyError>,
    ) -> Result<(), ProxyError> {
        match result {
            Ok(path) => {
                tracing::debug!(instance = %self.name, path = %path, "Opened {action} result");
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to {action} {target}: {e}");
                tracing::error!(instance = %self.name, "{message}");
                if !self.is_disposed() {
                    self.services.notifier.notify_error(&message);
                }
                Err(e)
            }
        }
    }

    // -- Lifecycle --

    pub fn is_disposed(&self) -> bool {
        self.cache.is_disposed()
    }

    /// Tear down the instance's durable state. Safe to call more than once.
    pub async fn dispose(&self) {
        self.cache.dispose().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
