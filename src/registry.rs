//! Instance registry: the live UI instances of the extension, keyed by name.
//!
//! Owned by the hosting shell. Opening a name that is already live returns
//! the existing instance; opening an unknown name restores whatever state
//! the durable store still holds for it.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::session::{HostServices, SessionContext};
use crate::session_cache::{SessionCache, StateScope};
use crate::state_store::StateStore;

pub struct InstanceRegistry {
    instances: DashMap<String, Arc<SessionContext>>,
    store: Arc<dyn StateStore>,
    services: HostServices,
    version: RwLock<String>,
}

impl InstanceRegistry {
    pub fn new(store: Arc<dyn StateStore>, services: HostServices) -> Self {
        Self {
            instances: DashMap::new(),
            store,
            services,
            version: RwLock::new(String::new()),
        }
    }

    /// Registry with the backend version already fetched.
    pub async fn activate(store: Arc<dyn StateStore>, services: HostServices) -> Self {
        let registry = Self::new(store, services);
        registry.refresh_version().await;
        tracing::info!("Extension {} is activated", crate::PLUGIN_NAME);
        registry
    }

    /// Fetch the backend version. On failure the previous value is kept.
    pub async fn refresh_version(&self) {
        match self.services.proxy.fetch_version().await {
            Ok(version) => {
                tracing::info!("Extension {} version: {version}", crate::PLUGIN_NAME);
                *self.version.write() = version;
            }
            Err(e) => tracing::error!("Failed to fetch {} version: {e}", crate::PLUGIN_NAME),
        }
    }

    pub fn version(&self) -> String {
        self.version.read().clone()
    }

    /// Find the live instance called `name`, or create it. Without a name a
    /// fresh one is generated from the current time.
    pub async fn open(&self, name: Option<&str>) -> Arc<SessionContext> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => {
                if let Some(existing) = self.find(name) {
                    return existing;
                }
                name.to_string()
            }
            None => self.generate_name(),
        };

        let cache = SessionCache::restore(StateScope::for_instance(&name), self.store.clone()).await;
        let enabled = self.services.proxy.widget_enabled().await;
        let context = Arc::new(SessionContext::new(
            name.clone(),
            cache,
            self.services.clone(),
            self.version(),
            enabled,
        ));

        match self.instances.entry(name) {
            // Lost a race with a concurrent open of the same name
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(v) => {
                tracing::debug!(instance = %v.key(), enabled, "Instance created");
                v.insert(context.clone());
                context
            }
        }
    }

    fn generate_name(&self) -> String {
        let mut stamp = chrono::Utc::now().timestamp_millis();
        while self.instances.contains_key(&stamp.to_string()) {
            stamp += 1;
        }
        stamp.to_string()
    }

    pub fn find(&self, name: &str) -> Option<Arc<SessionContext>> {
        self.instances.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Remove and dispose the instance. Returns false for unknown names.
    pub async fn close(&self, name: &str) -> bool {
        let Some((_, context)) = self.instances.remove(name) else {
            return false;
        };
        context.dispose().await;
        tracing::debug!(instance = name, "Instance closed");
        true
    }

    pub async fn close_all(&self) {
        for name in self.names() {
            self.close(&name).await;
        }
    }

    /// Live instance names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
