//! Authenticated request transport.
//!
//! The proxy never talks to the network directly; it hands a fully built URL
//! and a `RequestInit` to a `RequestTransport`. `HttpTransport` is the
//! reqwest-backed implementation that attaches the notebook server token.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;

/// Maximum response body size (10 MB).
const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Method, headers and body of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInit {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Default for RequestInit {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

impl RequestInit {
    /// POST with a JSON body.
    pub fn post_json(body: &serde_json::Value) -> Self {
        Self {
            method: "POST".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.to_string()),
        }
    }
}

/// Raw transported response, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// 2xx, the same range the browser's `Response.ok` covers.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Executes one request against the authenticated backend.
///
/// Fails with `TransportError` only when no response was obtained; any
/// transported HTTP status, error or not, is returned as a `RawResponse`.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn execute(&self, url: Url, init: RequestInit) -> Result<RawResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// reqwest transport
// ---------------------------------------------------------------------------

pub struct HttpTransport {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpTransport {
    /// Build a transport sending `Authorization: token <token>` when a token is set.
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| TransportError::with_source("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            token: token.filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn execute(&self, url: Url, init: RequestInit) -> Result<RawResponse, TransportError> {
        let method: reqwest::Method = init
            .method
            .parse()
            .map_err(|_| TransportError::new(format!("Invalid HTTP method: {}", init.method)))?;

        let mut request = self.client.request(method, url.clone());
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        for (key, value) in &init.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = init.body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::with_source(format!("Request to {url} failed"), e))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::with_source("Failed to read response body", e))?;

        if body.len() > MAX_RESPONSE_BYTES {
            return Err(TransportError::new(format!(
                "Response body exceeds maximum size ({} bytes > {} bytes)",
                body.len(),
                MAX_RESPONSE_BYTES
            )));
        }

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
