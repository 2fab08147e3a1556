//! Onyx GUI extension core.
//!
//! A per-instance session cache with write-through persistence, and an API
//! proxy that relays requests to the backend extension through the notebook
//! server. The `server` module is that backend extension.

pub mod config;
pub mod error;
pub mod host;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod session;
pub mod session_cache;
pub mod state_store;
pub mod transport;

use std::sync::Once;

pub use error::{ProxyError, StoreError, TransportError};
pub use host::{DocumentOpener, LogNotifier, Notifier};
pub use proxy::{ApiProxy, BackendTarget, ProxySettings, ResponseBody};
pub use registry::InstanceRegistry;
pub use session::{HostServices, SessionContext};
pub use session_cache::{SessionCache, StateScope};
pub use state_store::{JsonFileStateStore, MemoryStateStore, StateEntry, StateStore};
pub use transport::{HttpTransport, RawResponse, RequestInit, RequestTransport};

/// Backend extension name, also the URL path segment it is mounted under.
pub const PLUGIN_NAME: &str = "climb-onyx-gui";

/// Durable state namespace. Keeps the `-extension` suffix so states saved by
/// earlier releases still load.
pub const PLUGIN_NAMESPACE: &str = "@climb-onyx-gui-extension";

pub const PLUGIN_ID: &str = "@climb-onyx-gui-extension:plugin";

/// Path segment of the sibling extension reachable via `BackendTarget::Alternate`.
pub const ALTERNATE_EXTENSION_PATH: &str = "climb-agate-gui";

const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Install the fmt subscriber once. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
        // Another subscriber may already be installed by an embedder
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
