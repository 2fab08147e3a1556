//! Per-instance key/value cache with write-through persistence.
//!
//! Reads are served from the in-memory mirror only, so `get` and `set` stay
//! synchronous for the UI. Every `set` schedules a detached write to the
//! durable store; the mirror stays authoritative whether or not that write
//! lands.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::state_store::{StateEntry, StateStore};

// ---------------------------------------------------------------------------
// Key scope
// ---------------------------------------------------------------------------

/// Where one instance's keys live inside the shared durable store.
///
/// Full keys are `<prefix>:<logical-key>` where the prefix is
/// `<plugin-id>:<instance-name>`. `namespace` is what the store is listed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateScope {
    namespace: String,
    prefix: String,
}

impl StateScope {
    pub fn new(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            prefix: prefix.into(),
        }
    }

    /// Scope of the named instance of this extension.
    pub fn for_instance(name: &str) -> Self {
        Self::new(crate::PLUGIN_NAMESPACE, format!("{}:{name}", crate::PLUGIN_ID))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// True when `id` belongs to this scope. Matching stops at the `:` so
    /// instance `1` never claims the keys of instance `12`.
    pub fn owns(&self, id: &str) -> bool {
        id.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

// ---------------------------------------------------------------------------
// In-flight write tracking
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PendingWrites {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending count on drop, so a panicking store still releases
/// anyone waiting in `flush`.
struct PendingGuard(Arc<PendingWrites>);

impl PendingGuard {
    fn begin(pending: &Arc<PendingWrites>) -> Self {
        pending.count.fetch_add(1, Ordering::AcqRel);
        Self(pending.clone())
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// Session cache
// ---------------------------------------------------------------------------

/// How long `dispose` waits for in-flight saves before sweeping anyway.
pub const FLUSH_GRACE: Duration = Duration::from_secs(5);

pub struct SessionCache {
    scope: StateScope,
    mirror: RwLock<HashMap<String, Value>>,
    store: Arc<dyn StateStore>,
    runtime: Option<Handle>,
    pending: Arc<PendingWrites>,
    disposed: AtomicBool,
    flush_grace: Duration,
}

impl SessionCache {
    /// Empty cache for a fresh instance. Persistence writes are spawned on the
    /// tokio runtime current at construction; without one, values are kept in
    /// memory only.
    pub fn new(scope: StateScope, store: Arc<dyn StateStore>) -> Self {
        Self {
            scope,
            mirror: RwLock::new(HashMap::new()),
            store,
            runtime: Handle::try_current().ok(),
            pending: Arc::new(PendingWrites::default()),
            disposed: AtomicBool::new(false),
            flush_grace: FLUSH_GRACE,
        }
    }

    /// Override how long `dispose` waits for in-flight saves.
    pub fn with_flush_grace(mut self, grace: Duration) -> Self {
        self.flush_grace = grace;
        self
    }

    /// Cache for a restored instance, seeded from whatever the durable store
    /// already holds under the scope. A failed listing is logged and the
    /// cache starts empty.
    pub async fn restore(scope: StateScope, store: Arc<dyn StateStore>) -> Self {
        let seed = match store.list(scope.namespace()).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(prefix = scope.prefix(), "Failed to load saved state: {e}");
                Vec::new()
            }
        };
        let cache = Self::new(scope, store);
        cache.initialize(seed);
        cache
    }

    /// Prime the mirror from a snapshot of durable entries. Entries outside
    /// this cache's scope are ignored.
    pub fn initialize(&self, seed: impl IntoIterator<Item = StateEntry>) {
        let mut mirror = self.mirror.write();
        for entry in seed {
            if self.scope.owns(&entry.id) {
                mirror.insert(entry.id, entry.value);
            }
        }
    }

    pub fn scope(&self) -> &StateScope {
        &self.scope
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.mirror.read().get(&self.scope.state_key(key)).cloned()
    }

    /// Update the mirror and schedule persistence. Returns before the durable
    /// write completes; a failed write is logged and otherwise ignored.
    pub fn set(&self, key: &str, value: Value) {
        let state_key = self.scope.state_key(key);
        let guard = {
            // Under the mirror lock: dispose either waits on this save or
            // this call sees the cache disposed.
            let mut mirror = self.mirror.write();
            if self.is_disposed() {
                tracing::debug!(prefix = self.scope.prefix(), key, "Ignoring set on disposed cache");
                return;
            }
            mirror.insert(state_key.clone(), value.clone());
            self.runtime.as_ref().map(|_| PendingGuard::begin(&self.pending))
        };
        self.persist(state_key, value, guard);
    }

    fn persist(&self, state_key: String, value: Value, guard: Option<PendingGuard>) {
        let (Some(runtime), Some(guard)) = (&self.runtime, guard) else {
            tracing::warn!(key = %state_key, "No async runtime; state kept in memory only");
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            let _guard = guard;
            if let Err(e) = store.save(&state_key, value).await {
                tracing::warn!(key = %state_key, "Failed to save state: {e}");
            }
        });
    }

    /// Number of logical keys currently held in memory.
    pub fn len(&self) -> usize {
        self.mirror.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.read().is_empty()
    }

    /// Wait until every persistence write scheduled so far has finished.
    pub async fn flush(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending.count.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Remove every durable key under this scope, including keys written by an
    /// earlier incarnation that were never loaded into memory. Runs once;
    /// later calls return immediately. Removal failures are logged, not retried.
    ///
    /// In-flight saves get `FLUSH_GRACE` to land before the sweep. A save still
    /// running after that may land once the sweep is done.
    pub async fn dispose(&self) {
        {
            let mut mirror = self.mirror.write();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            mirror.clear();
        }

        if tokio::time::timeout(self.flush_grace, self.flush()).await.is_err() {
            tracing::warn!(
                prefix = self.scope.prefix(),
                pending = self.pending.count.load(Ordering::Acquire),
                "Saves still in flight after {:?}; cleaning up anyway",
                self.flush_grace
            );
        }

        let entries = match self.store.list(self.scope.namespace()).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(prefix = self.scope.prefix(), "Failed to list state for cleanup: {e}");
                return;
            }
        };

        for entry in entries.iter().filter(|e| self.scope.owns(&e.id)) {
            if let Err(e) = self.store.remove(&entry.id).await {
                tracing::warn!(key = %entry.id, "Failed to remove state: {e}");
            }
        }
        tracing::debug!(prefix = self.scope.prefix(), "Session state cleaned up");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
