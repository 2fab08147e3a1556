//! Backend extension server.
//!
//! Serves the endpoints the proxy talks to, mounted under
//! `<base_url>/climb-onyx-gui/`:
//!
//! - `widget-enabled` / `version`: capability probes
//! - `reroute`: authenticated relay to the Onyx API
//! - `s3`: download an object from S3 into the server root
//! - `file-write`: write text content into the server root

mod errors;
mod handlers;
mod objects;
mod types;
mod validators;

pub use errors::ApiError;
pub use objects::{HttpObjectFetcher, ObjectFetcher, S3Credentials};

use axum::Router;
use axum::routing::{get, post};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

const DEFAULT_REGION: &str = "us-east-1";

/// Server settings, mostly sourced from the JupyterLab environment.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Notebook server base URL path, e.g. `/` or `/user/alice/`
    pub base_url: String,
    /// Directory files are written into
    pub root_dir: PathBuf,
    pub onyx_domain: Option<String>,
    pub onyx_token: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub s3_endpoint: Option<String>,
    pub region: String,
    pub upstream_timeout: Duration,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            root_dir: root_dir.into(),
            onyx_domain: None,
            onyx_token: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            s3_endpoint: None,
            region: DEFAULT_REGION.to_string(),
            upstream_timeout: Duration::from_secs(crate::transport::DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Read credentials from the environment. Empty variables count as unset.
    pub fn from_env(base_url: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            onyx_domain: env_value("ONYX_DOMAIN"),
            onyx_token: env_value("ONYX_TOKEN"),
            aws_access_key_id: env_value("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: env_value("AWS_SECRET_ACCESS_KEY"),
            s3_endpoint: env_value("JUPYTERLAB_S3_ENDPOINT"),
            region: env_value("AWS_REGION")
                .or_else(|| env_value("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            ..Self::new(base_url, root_dir)
        }
    }

    /// `(domain, token)` when both are configured.
    pub fn onyx_credentials(&self) -> Option<(&str, &str)> {
        Some((self.onyx_domain.as_deref()?, self.onyx_token.as_deref()?))
    }

    pub fn s3_credentials(&self) -> Option<S3Credentials> {
        Some(S3Credentials {
            access_key_id: self.aws_access_key_id.clone()?,
            secret_access_key: self.aws_secret_access_key.clone()?,
            endpoint: self.s3_endpoint.clone()?,
            region: self.region.clone(),
        })
    }

    /// Route prefix for the extension, e.g. `/user/alice/climb-onyx-gui`.
    fn mount_path(&self) -> String {
        let base = self.base_url.trim_matches('/');
        if base.is_empty() {
            format!("/{}", crate::PLUGIN_NAME)
        } else {
            format!("/{base}/{}", crate::PLUGIN_NAME)
        }
    }
}

pub struct ServerState {
    pub config: ServerConfig,
    pub client: reqwest::Client,
    pub objects: Arc<dyn ObjectFetcher>,
}

impl ServerState {
    /// State with a shared reqwest client and the bundled S3 fetcher.
    pub fn new(config: ServerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        let objects = Arc::new(HttpObjectFetcher::new(client.clone()));
        Ok(Self {
            config,
            client,
            objects,
        })
    }

    pub fn with_fetcher(mut self, objects: Arc<dyn ObjectFetcher>) -> Self {
        self.objects = objects;
        self
    }
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let mount = state.config.mount_path();
    Router::new()
        .route(&format!("{mount}/widget-enabled"), get(handlers::widget_enabled))
        .route(&format!("{mount}/version"), get(handlers::version))
        .route(&format!("{mount}/reroute"), get(handlers::reroute))
        .route(&format!("{mount}/s3"), get(handlers::s3_download))
        .route(&format!("{mount}/file-write"), post(handlers::file_write))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until ctrl-c.
pub async fn start_server(state: Arc<ServerState>, addr: &str) -> std::io::Result<()> {
    let mount = state.config.mount_path();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!("Onyx GUI backend listening on http://{local}{mount}/");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serial_test::serial;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Serves a fixed object, or fails with the given error.
    struct FixedObjects(Result<Vec<u8>, ApiError>);

    #[async_trait]
    impl ObjectFetcher for FixedObjects {
        async fn fetch(&self, _: &S3Credentials, _: &str, _: &str) -> Result<Vec<u8>, ApiError> {
            self.0.clone()
        }
    }

    fn onyx_config(root: &TempDir, domain: &str) -> ServerConfig {
        ServerConfig {
            onyx_domain: Some(domain.to_string()),
            onyx_token: Some("secret-token".to_string()),
            ..ServerConfig::new("/", root.path())
        }
    }

    fn s3_config(root: &TempDir) -> ServerConfig {
        ServerConfig {
            aws_access_key_id: Some("AKID".to_string()),
            aws_secret_access_key: Some("secret".to_string()),
            s3_endpoint: Some("http://127.0.0.1:1".to_string()),
            ..ServerConfig::new("/", root.path())
        }
    }

    fn router(config: ServerConfig) -> Router {
        build_router(Arc::new(ServerState::new(config).unwrap()))
    }

    fn router_with_objects(config: ServerConfig, objects: FixedObjects) -> Router {
        let state = ServerState::new(config).unwrap().with_fetcher(Arc::new(objects));
        build_router(Arc::new(state))
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn mount_path_respects_base_url() {
        assert_eq!(ServerConfig::new("/", "/tmp").mount_path(), "/climb-onyx-gui");
        assert_eq!(ServerConfig::new("", "/tmp").mount_path(), "/climb-onyx-gui");
        assert_eq!(
            ServerConfig::new("/user/alice/", "/tmp").mount_path(),
            "/user/alice/climb-onyx-gui"
        );
    }

    #[test]
    #[serial]
    fn from_env_treats_empty_as_unset() {
        // SAFETY: serialised with other env-mutating tests via #[serial]
        unsafe {
            std::env::set_var("ONYX_DOMAIN", "https://onyx.example.org");
            std::env::set_var("ONYX_TOKEN", "");
            std::env::remove_var("AWS_REGION");
            std::env::set_var("AWS_DEFAULT_REGION", "eu-west-2");
        }
        let config = ServerConfig::from_env("/", "/tmp");
        unsafe {
            std::env::remove_var("ONYX_DOMAIN");
            std::env::remove_var("ONYX_TOKEN");
            std::env::remove_var("AWS_DEFAULT_REGION");
        }
        assert_eq!(config.onyx_domain.as_deref(), Some("https://onyx.example.org"));
        assert_eq!(config.onyx_token, None);
        assert!(config.onyx_credentials().is_none());
        assert_eq!(config.region, "eu-west-2");
    }

    #[tokio::test]
    async fn widget_enabled_reflects_onyx_credentials() {
        let root = TempDir::new().unwrap();
        let (status, body) = send(
            router(onyx_config(&root, "https://onyx.example.org")),
            get("/climb-onyx-gui/widget-enabled"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"enabled": true}));

        let (_, body) = send(
            router(ServerConfig::new("/", root.path())),
            get("/climb-onyx-gui/widget-enabled"),
        )
        .await;
        assert_eq!(json(&body), serde_json::json!({"enabled": false}));
    }

    #[tokio::test]
    async fn version_reports_package_version() {
        let root = TempDir::new().unwrap();
        let (status, body) = send(router(ServerConfig::new("/user/alice/", root.path())), get("/user/alice/climb-onyx-gui/version")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn reroute_requires_credentials() {
        let root = TempDir::new().unwrap();
        let (status, body) = send(
            router(ServerConfig::new("/", root.path())),
            get("/climb-onyx-gui/reroute?route=projects/"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            json(&body)["message"],
            "Cannot connect to Onyx: JupyterLab environment does not have credentials"
        );
    }

    #[tokio::test]
    async fn reroute_requires_route() {
        let root = TempDir::new().unwrap();
        let (status, body) = send(
            router(onyx_config(&root, "https://onyx.example.org")),
            get("/climb-onyx-gui/reroute"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["message"], "Route is required");
    }

    #[tokio::test]
    async fn reroute_forwards_with_token_and_passes_status_through() {
        let mut onyx = mockito::Server::new_async().await;
        let ok = onyx
            .mock("GET", "/projects/")
            .match_header("authorization", "Token secret-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":["mpx"]}"#)
            .create_async()
            .await;
        let missing = onyx
            .mock("GET", "/projects/nope/")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"not found"}"#)
            .create_async()
            .await;

        let root = TempDir::new().unwrap();
        let app = router(onyx_config(&root, &format!("{}/", onyx.url())));

        let (status, body) = send(app.clone(), get("/climb-onyx-gui/reroute?route=projects/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"data": ["mpx"]}));

        let (status, body) = send(app, get("/climb-onyx-gui/reroute?route=projects/nope/")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["message"], "not found");

        ok.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn reroute_maps_refused_connection_to_bad_gateway() {
        let root = TempDir::new().unwrap();
        // Port 1 is reserved and closed on test hosts
        let (status, body) = send(
            router(onyx_config(&root, "http://127.0.0.1:1")),
            get("/climb-onyx-gui/reroute?route=projects/"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json(&body)["message"], "Failed to connect to Onyx: Connection refused");
    }

    #[tokio::test]
    async fn s3_validates_uri_before_credentials() {
        let root = TempDir::new().unwrap();
        let app = router(ServerConfig::new("/", root.path()));

        let (status, body) = send(app.clone(), get("/climb-onyx-gui/s3")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["message"], "S3 URI is required");

        let (status, body) = send(app.clone(), get("/climb-onyx-gui/s3?uri=https://x/y")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["message"], "Invalid S3 URI: https://x/y");

        let (status, body) = send(app, get("/climb-onyx-gui/s3?uri=s3://bucket/a.html")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            json(&body)["message"],
            "Cannot connect to S3: JupyterLab environment does not have credentials"
        );
    }

    #[tokio::test]
    async fn s3_downloads_into_root() {
        let root = TempDir::new().unwrap();
        let app = router_with_objects(s3_config(&root), FixedObjects(Ok(b"<p>report</p>".to_vec())));

        let (status, body) = send(app, get("/climb-onyx-gui/s3?uri=s3://climb-bucket/run/report.html")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"path": "s3_downloads/run/report.html"}));

        let written = std::fs::read(root.path().join("s3_downloads/run/report.html")).unwrap();
        assert_eq!(written, b"<p>report</p>");
    }

    #[tokio::test]
    async fn s3_rejects_keys_outside_downloads() {
        let root = TempDir::new().unwrap();
        let app = router_with_objects(s3_config(&root), FixedObjects(Ok(Vec::new())));
        let (status, body) = send(app, get("/climb-onyx-gui/s3?uri=s3://bucket/../../etc/passwd")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["message"], "Invalid S3 key: ../../etc/passwd");
    }

    #[tokio::test]
    async fn s3_fetch_errors_keep_their_status() {
        let root = TempDir::new().unwrap();
        let app = router_with_objects(
            s3_config(&root),
            FixedObjects(Err(ApiError::NotFound("S3 object not found: s3://bucket/a.html".into()))),
        );
        let (status, body) = send(app, get("/climb-onyx-gui/s3?uri=s3://bucket/a.html")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["message"], "S3 object not found: s3://bucket/a.html");
    }

    #[tokio::test]
    async fn file_write_saves_content() {
        let root = TempDir::new().unwrap();
        let app = router(ServerConfig::new("/", root.path()));
        let (status, body) = send(
            app,
            post("/climb-onyx-gui/file-write?path=a.csv", r#"{"content":"x,y\n1,2"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({"path": "a.csv"}));
        assert_eq!(std::fs::read_to_string(root.path().join("a.csv")).unwrap(), "x,y\n1,2");
    }

    #[tokio::test]
    async fn file_write_validation_messages() {
        let root = TempDir::new().unwrap();
        let app = router(ServerConfig::new("/", root.path()));

        let cases = [
            ("/climb-onyx-gui/file-write", r#"{"content":"x"}"#, "Filename is required"),
            ("/climb-onyx-gui/file-write?path=../a.csv", r#"{"content":"x"}"#, "Invalid filename: ../a.csv"),
            ("/climb-onyx-gui/file-write?path=a.csv", "not json", "Invalid JSON in body of request"),
            ("/climb-onyx-gui/file-write?path=a.csv", "", "Input content is required"),
            ("/climb-onyx-gui/file-write?path=a.csv", r#"{"other":1}"#, "Input content is required"),
        ];
        for (uri, body, message) in cases {
            let (status, resp) = send(app.clone(), post(uri, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {body}");
            assert_eq!(json(&resp)["message"], message, "{uri} {body}");
        }
        assert!(!root.path().join("a.csv").exists());
    }
}
