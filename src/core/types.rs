use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::UploadError;
use super::traits::{AlwaysOnline, ConflictResolver, Connectivity, Sleeper, TokioSleeper, UploadContent};

/// Correlates the log lines of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(pub Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the server does when the target name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    #[default]
    Fail,
    Replace,
    Rename,
}

impl ConflictBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Replace => "replace",
            Self::Rename => "rename",
        }
    }
}

impl std::fmt::Display for ConflictBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The drive item produced by a finished upload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadedItem {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Everything else the server sent back.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Absolute upload position reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f64,
}

impl UploadProgress {
    pub fn new(uploaded_bytes: u64, total_bytes: u64) -> Self {
        let percentage = if total_bytes > 0 {
            (uploaded_bytes as f64 / total_bytes as f64) * 100.0
        } else {
            100.0
        };

        Self {
            uploaded_bytes,
            total_bytes,
            percentage,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Sync + Send>;

/// Snapshot threaded through the state machine.
///
/// The driver never edits a snapshot in place; every step consumes one and
/// returns the next.
#[derive(Debug, Clone, Default)]
pub struct UploadState {
    /// Server-issued resumable session handle
    pub session_url: Option<String>,

    /// Ranges the server still needs, `"start-"` or `"start-endInclusive"`
    pub next_expected_ranges: Option<Vec<String>>,

    pub conflict_behavior: Option<ConflictBehavior>,

    /// Last exponential backoff delay
    pub wait_duration: Option<Duration>,

    /// Remaining fixed-interval retries
    pub attempts_remaining: Option<u32>,

    /// Terminal success
    pub item: Option<UploadedItem>,

    /// Failure of the last step, terminal once the error handler gives up
    pub error: Option<UploadError>,

    /// Fraction of the max fragment size in use
    pub speed: Option<f64>,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        self.item.is_some() || self.error.is_some()
    }

    pub fn with_error(self, error: UploadError) -> Self {
        Self {
            error: Some(error),
            ..self
        }
    }
}

/// Everything the engine needs to know about one upload. Read-only to the engine.
#[derive(Clone)]
pub struct UploadConfiguration {
    /// Parent location, e.g. `https://graph.microsoft.com/v1.0/me/drive/root:/Documents`
    pub item_url: String,
    pub file_name: String,
    pub content: Arc<dyn UploadContent>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub on_progress: Option<ProgressCallback>,
    pub conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    pub sleeper: Arc<dyn Sleeper>,
    pub connectivity: Arc<dyn Connectivity>,

    /// Finish with an explicit commit instead of relying on the last fragment
    pub use_commit: bool,

    /// Deadline of a single fragment request
    pub fragment_timeout: Duration,

    /// Budget of fixed-interval retries
    pub max_retry_attempts: u32,
}

impl UploadConfiguration {
    pub fn new(
        item_url: impl Into<String>,
        file_name: impl Into<String>,
        content: Arc<dyn UploadContent>,
    ) -> Self {
        Self {
            item_url: item_url.into(),
            file_name: file_name.into(),
            content,
            last_modified: None,
            etag: None,
            on_progress: None,
            conflict_resolver: None,
            sleeper: Arc::new(TokioSleeper),
            connectivity: Arc::new(AlwaysOnline),
            use_commit: false,
            fragment_timeout: crate::upload::constants::DEFAULT_FRAGMENT_TIMEOUT,
            max_retry_attempts: crate::upload::constants::DEFAULT_RETRY_ATTEMPTS,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_conflict_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.conflict_resolver = Some(resolver);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_commit(mut self, use_commit: bool) -> Self {
        self.use_commit = use_commit;
        self
    }

    pub fn with_fragment_timeout(mut self, timeout: Duration) -> Self {
        self.fragment_timeout = timeout;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn file_size(&self) -> u64 {
        self.content.size()
    }
}

impl std::fmt::Debug for UploadConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadConfiguration")
            .field("item_url", &self.item_url)
            .field("file_name", &self.file_name)
            .field("file_size", &self.file_size())
            .field("etag", &self.etag)
            .field("use_commit", &self.use_commit)
            .finish()
    }
}
