use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use super::errors::Result;
use super::types::ConflictBehavior;
use super::errors::UploadError;

/// HTTP verb of a [`DataRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Bytes(Bytes),
}

/// Receives the number of body bytes sent so far for one request.
pub type UploadProgressCallback = Arc<dyn Fn(u64) + Sync + Send>;

/// One request handed to the transport.
#[derive(Clone)]
pub struct DataRequest {
    /// Name used in logs and telemetry
    pub api_name: &'static str,
    pub url: String,
    pub request_type: RequestType,
    pub body: RequestBody,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub on_upload_progress: Option<UploadProgressCallback>,

    /// Session URLs are pre-authenticated and must not carry a token
    pub needs_authorization: bool,

    /// Send the token as an `Authorization` header instead of a query parameter
    pub use_authorization_headers: bool,

    /// Overrides the transport's own token
    pub access_token: Option<String>,
}

impl DataRequest {
    pub fn new(api_name: &'static str, request_type: RequestType, url: impl Into<String>) -> Self {
        Self {
            api_name,
            url: url.into(),
            request_type,
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
            timeout: None,
            on_upload_progress: None,
            needs_authorization: true,
            use_authorization_headers: true,
            access_token: None,
        }
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn bytes(mut self, body: Bytes) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_upload_progress(mut self, callback: UploadProgressCallback) -> Self {
        self.on_upload_progress = Some(callback);
        self
    }

    pub fn without_authorization(mut self) -> Self {
        self.needs_authorization = false;
        self
    }
}

impl std::fmt::Debug for DataRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRequest")
            .field("api_name", &self.api_name)
            .field("url", &self.url)
            .field("request_type", &self.request_type)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("needs_authorization", &self.needs_authorization)
            .finish()
    }
}

/// Transport collaborator. Answers with the decoded JSON body
/// (`Value::Null` for empty bodies) or a [`UploadError::Request`].
#[async_trait]
pub trait DataRequestor: Send + Sync {
    async fn send(&self, request: DataRequest) -> Result<serde_json::Value>;
}

/// Random access to the bytes being uploaded.
#[async_trait]
pub trait UploadContent: Send + Sync {
    fn size(&self) -> u64;

    /// Bytes of `[start, end)`
    async fn slice(&self, start: u64, end: u64) -> Result<Bytes>;
}

/// Asks the user what to do about a name or version clash.
///
/// `None` gives up and surfaces the conflict error.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve_conflict(&self, error: &UploadError) -> Option<ConflictBehavior>;
}

/// Backoff waits go through here so callers can pace or observe them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}
