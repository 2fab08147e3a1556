//! API proxy: relays the UI's backend requests through the notebook server.
//!
//! Every call goes through one low-level executor that builds
//! `<base_url>/<extension-path>/<sub-resource>?<params>` and hands it to the
//! `RequestTransport`. On top of it sit the JSON executor and the relay
//! operations the UI is given:
//! - `route_request`: passthrough of an arbitrary backend route (`reroute`)
//! - `resolve_remote_object`: download an `s3://` object, open the local copy
//! - `write_remote_file`: write text content server-side, open the result
//!
//! No retries happen here; repeating an action is the UI's call.

use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::error::ProxyError;
use crate::host::DocumentOpener;
use crate::transport::{RawResponse, RequestInit, RequestTransport};

/// Sub-resource names of the backend extension.
pub mod endpoints {
    pub const REROUTE: &str = "reroute";
    pub const S3: &str = "s3";
    pub const FILE_WRITE: &str = "file-write";
    pub const VERSION: &str = "version";
    pub const WIDGET_ENABLED: &str = "widget-enabled";
}

/// Which logical backend a relay addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendTarget {
    #[default]
    Primary,
    /// Same relay, served under the alternate extension path.
    Alternate,
}

// ---------------------------------------------------------------------------
// Response body
// ---------------------------------------------------------------------------

/// Body of a JSON-executor response: parsed JSON, or the raw text when the
/// body is empty or not JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Parse `text` as JSON when non-empty, otherwise keep the raw text.
    pub fn from_text(text: String) -> Self {
        if text.is_empty() {
            return Self::Text(text);
        }
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => {
                tracing::debug!("Not a JSON response body.");
                Self::Text(text)
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.as_json()?.get(field)?.as_str()
    }

    pub fn bool_field(&self, field: &str) -> Option<bool> {
        self.as_json()?.get(field)?.as_bool()
    }

    /// Best available error text: the `message` field when present and
    /// non-empty, otherwise the whole body.
    pub fn message(&self) -> String {
        match self {
            Self::Json(value) => match value.get("message") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(other) if is_truthy(other) => other.to_string(),
                _ => match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            },
            Self::Text(text) => text.clone(),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn remote_error(status: u16, body: &ResponseBody) -> ProxyError {
    let mut message = body.message();
    if message.is_empty() {
        message = format!("Request failed with status {status}");
    }
    ProxyError::Remote { status, message }
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

/// Where the backend extension lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub base_url: Url,
    pub extension_path: String,
    pub alternate_extension_path: String,
}

impl ProxySettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            extension_path: crate::PLUGIN_NAME.to_string(),
            alternate_extension_path: crate::ALTERNATE_EXTENSION_PATH.to_string(),
        }
    }
}

pub struct ApiProxy {
    settings: ProxySettings,
    transport: Arc<dyn RequestTransport>,
}

impl ApiProxy {
    pub fn new(settings: ProxySettings, transport: Arc<dyn RequestTransport>) -> Self {
        Self { settings, transport }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Build the request URL. Pairs with an empty name are omitted.
    pub fn request_url(
        &self,
        target: BackendTarget,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Url, ProxyError> {
        let extension: &str = match target {
            BackendTarget::Primary => &self.settings.extension_path,
            BackendTarget::Alternate => &self.settings.alternate_extension_path,
        };
        let mut url = join_url(&self.settings.base_url, &[extension, endpoint])?;

        let mut pairs = params.iter().filter(|(name, _)| !name.is_empty()).peekable();
        if pairs.peek().is_some() {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    /// Low-level executor: returns the transported response whatever its status.
    pub async fn request_response(
        &self,
        endpoint: &str,
        init: RequestInit,
        params: &[(&str, &str)],
    ) -> Result<RawResponse, ProxyError> {
        self.execute(BackendTarget::Primary, endpoint, init, params).await
    }

    async fn execute(
        &self,
        target: BackendTarget,
        endpoint: &str,
        init: RequestInit,
        params: &[(&str, &str)],
    ) -> Result<RawResponse, ProxyError> {
        let url = self.request_url(target, endpoint, params)?;
        tracing::debug!(method = %init.method, %url, "Proxy request");
        Ok(self.transport.execute(url, init).await?)
    }

    /// JSON executor: a non-JSON body is kept as text; a failure status
    /// becomes `ProxyError::Remote` with the body's best message.
    pub async fn request_json(
        &self,
        endpoint: &str,
        init: RequestInit,
        params: &[(&str, &str)],
    ) -> Result<ResponseBody, ProxyError> {
        let response = self.request_response(endpoint, init, params).await?;
        let body = ResponseBody::from_text(response.text());
        if !response.ok() {
            return Err(remote_error(response.status, &body));
        }
        Ok(body)
    }

    /// Relay `route` to the backend and return the raw response for the UI to
    /// interpret. A failure status is reported as `ProxyError::Remote`.
    pub async fn route_request(
        &self,
        route: &str,
        target: BackendTarget,
    ) -> Result<RawResponse, ProxyError> {
        let response = self
            .execute(target, endpoints::REROUTE, RequestInit::default(), &[("route", route)])
            .await?;
        if !response.ok() {
            let body = ResponseBody::from_text(response.text());
            return Err(remote_error(response.status, &body));
        }
        Ok(response)
    }

    /// Download the object behind `uri` server-side and open the local copy.
    /// Returns the opened path.
    pub async fn resolve_remote_object(
        &self,
        uri: &str,
        documents: &dyn DocumentOpener,
    ) -> Result<String, ProxyError> {
        let body = self
            .request_json(endpoints::S3, RequestInit::default(), &[("uri", uri)])
            .await?;
        open_returned_path(&body, documents)
    }

    /// Write `content` to `path` server-side and open the written file.
    /// Returns the opened path.
    pub async fn write_remote_file(
        &self,
        path: &str,
        content: &str,
        documents: &dyn DocumentOpener,
    ) -> Result<String, ProxyError> {
        let init = RequestInit::post_json(&serde_json::json!({ "content": content }));
        let body = self
            .request_json(endpoints::FILE_WRITE, init, &[("path", path)])
            .await?;
        open_returned_path(&body, documents)
    }

    /// Version string reported by the backend extension.
    pub async fn fetch_version(&self) -> Result<String, ProxyError> {
        let body = self
            .request_json(endpoints::VERSION, RequestInit::default(), &[])
            .await?;
        body.str_field("version")
            .map(str::to_string)
            .ok_or(ProxyError::MissingField { field: "version" })
    }

    /// Whether the backend has credentials for Onyx. Any failure reads as
    /// disabled.
    pub async fn widget_enabled(&self) -> bool {
        match self
            .request_json(endpoints::WIDGET_ENABLED, RequestInit::default(), &[])
            .await
        {
            Ok(body) => body.bool_field("enabled").unwrap_or(false),
            Err(e) => {
                tracing::error!("Failed to fetch {} status: {e}", crate::PLUGIN_NAME);
                false
            }
        }
    }
}

fn open_returned_path(
    body: &ResponseBody,
    documents: &dyn DocumentOpener,
) -> Result<String, ProxyError> {
    let path = body
        .str_field("path")
        .ok_or(ProxyError::MissingField { field: "path" })?;
    documents.open(path);
    Ok(path.to_string())
}

/// Join path segments onto `base`, collapsing duplicate slashes. Any query or
/// fragment on `base` is dropped.
fn join_url(base: &Url, segments: &[&str]) -> Result<Url, ProxyError> {
    if base.cannot_be_a_base() {
        return Err(ProxyError::InvalidUrl(base.to_string()));
    }
    let mut path = String::new();
    let parts = std::iter::once(base.path()).chain(segments.iter().copied());
    for part in parts.flat_map(|p| p.split('/')).filter(|p| !p.is_empty()) {
        path.push('/');
        path.push_str(part);
    }
    if path.is_empty() {
        path.push('/');
    }

    let mut url = base.clone();
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
