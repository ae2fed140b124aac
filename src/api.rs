//! Sync backend API client.
//!
//! The remote store is a hosted document database reached over HTTP. The
//! `RemoteStore` trait is the capability set the reconciliation engine
//! consumes; `HttpRemoteStore` is the production implementation. All
//! operations are scoped by the tenant (`store_id`) and may fail with a
//! transient network error or not-found, which the engine handles.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Collection;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability set of the hosted document database. A stateless transport:
/// it owns no data and keeps no tenant state between calls.
pub trait RemoteStore: Send + Sync {
    /// Create a document and return the remote identifier it was assigned.
    fn create(
        &self,
        store_id: &str,
        collection: Collection,
        fields: &Value,
    ) -> impl Future<Output = Result<String>> + Send;

    fn get(
        &self,
        store_id: &str,
        collection: Collection,
        remote_id: &str,
    ) -> impl Future<Output = Result<Value>> + Send;

    fn list(
        &self,
        store_id: &str,
        collection: Collection,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send;

    fn update(
        &self,
        store_id: &str,
        collection: Collection,
        remote_id: &str,
        fields: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete(
        &self,
        store_id: &str,
        collection: Collection,
        remote_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Register a new store (tenant) record.
    fn create_store(
        &self,
        store_id: &str,
        fields: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch a store record; `RemoteNotFound` when the tenant does not exist.
    fn get_store(&self, store_id: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Lightweight health-check used for connectivity probing.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the sync backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_sync_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly transient failure.
fn friendly_error(url: &str, err: &reqwest::Error) -> Error {
    if err.is_connect() {
        return Error::RemoteTransient(format!("cannot reach sync backend at {url}"));
    }
    if err.is_timeout() {
        return Error::RemoteTransient(format!("connection to {url} timed out"));
    }
    if err.is_builder() {
        return Error::RemoteTransient(format!("invalid sync backend URL: {url}"));
    }
    Error::RemoteTransient(format!("network error communicating with {url}: {err}"))
}

/// Map a non-success HTTP status (plus response body) onto the taxonomy.
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| match status.as_u16() {
            401 => "API key is invalid or expired".to_string(),
            403 => "store not authorized".to_string(),
            404 => "sync backend record not found".to_string(),
            s if s >= 500 => format!("sync backend server error (HTTP {s})"),
            s => format!("unexpected response from sync backend (HTTP {s})"),
        });

    if status == StatusCode::NOT_FOUND {
        Error::RemoteNotFound(message)
    } else {
        Error::RemoteTransient(format!("{message} (HTTP {})", status.as_u16()))
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// `RemoteStore` over the sync backend's REST API.
pub struct HttpRemoteStore {
    base_url: String,
    api_key: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        HttpRemoteStore {
            base_url: normalize_sync_url(base_url),
            api_key: api_key.trim().to_string(),
        }
    }

    /// Perform an authenticated request. `path` includes the leading slash.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let full_url = format!("{}{path}", self.base_url);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::RemoteTransient(format!("failed to create HTTP client: {e}")))?;

        let mut req = client
            .request(method, &full_url)
            .header("X-Store-API-Key", &self.api_key)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }

        debug!(path, status = status.as_u16(), "sync backend request ok");

        // Return the JSON body, or null for empty 204 responses.
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| Error::RemoteTransient(format!("invalid JSON from sync backend: {e}")))
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn create(
        &self,
        store_id: &str,
        collection: Collection,
        fields: &Value,
    ) -> Result<String> {
        let path = format!("/api/stores/{store_id}/{}", collection.wire());
        let resp = self
            .request(Method::POST, &path, Some(fields), DEFAULT_TIMEOUT)
            .await?;
        resp.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::RemoteTransient("sync backend create returned no document id".into())
            })
    }

    async fn get(&self, store_id: &str, collection: Collection, remote_id: &str) -> Result<Value> {
        let path = format!("/api/stores/{store_id}/{}/{remote_id}", collection.wire());
        self.request(Method::GET, &path, None, DEFAULT_TIMEOUT).await
    }

    async fn list(&self, store_id: &str, collection: Collection) -> Result<Vec<Value>> {
        let path = format!("/api/stores/{store_id}/{}", collection.wire());
        let resp = self.request(Method::GET, &path, None, DEFAULT_TIMEOUT).await?;
        // Either a bare array or a `{ "documents": [...] }` wrapper.
        let documents = match resp {
            Value::Array(items) => items,
            other => other
                .get("documents")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        };
        Ok(documents)
    }

    async fn update(
        &self,
        store_id: &str,
        collection: Collection,
        remote_id: &str,
        fields: &Value,
    ) -> Result<()> {
        let path = format!("/api/stores/{store_id}/{}/{remote_id}", collection.wire());
        self.request(Method::PATCH, &path, Some(fields), DEFAULT_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn delete(&self, store_id: &str, collection: Collection, remote_id: &str) -> Result<()> {
        let path = format!("/api/stores/{store_id}/{}/{remote_id}", collection.wire());
        self.request(Method::DELETE, &path, None, DEFAULT_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn create_store(&self, store_id: &str, fields: &Value) -> Result<()> {
        let mut body = fields.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("store_id".into(), Value::String(store_id.to_string()));
        }
        self.request(Method::POST, "/api/stores", Some(&body), DEFAULT_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn get_store(&self, store_id: &str) -> Result<Value> {
        let path = format!("/api/stores/{store_id}");
        self.request(Method::GET, &path, None, DEFAULT_TIMEOUT).await
    }

    async fn ping(&self) -> Result<()> {
        self.request(Method::GET, "/api/health", None, CONNECTIVITY_TIMEOUT)
            .await?;
        Ok(())
    }
}
