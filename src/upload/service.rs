use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, CONTENT_RANGE, IF_MATCH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use crate::core::{
    ConflictBehavior, DataRequest, DataRequestor, RequestType, Result, UploadError,
    UploadProgressCallback, UploadedItem,
};

const PREFER: HeaderName = HeaderName::from_static("prefer");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSystemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionItem {
    #[serde(rename = "@name.conflictBehavior")]
    conflict_behavior: ConflictBehavior,
    file_size: u64,
    file_system_info: FileSystemInfo,
}

#[derive(Debug, Clone, Serialize)]
struct CreateSessionRequest {
    item: SessionItem,
}

#[derive(Debug, Clone, Serialize)]
struct CommitRequest<'a> {
    #[serde(rename = "@name.conflictBehavior")]
    conflict_behavior: ConflictBehavior,
    #[serde(rename = "@content.sourceUrl")]
    source_url: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_url: String,

    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionStatus {
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub next_expected_ranges: Option<Vec<String>>,
}

/// Result of sending one fragment
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOutcome {
    /// Server wants more bytes
    Pending(UploadSessionStatus),
    /// The last byte arrived and the server created the item
    Completed(UploadedItem),
}

/// Shapes the upload-session requests. Holds no state besides the transport.
#[derive(Clone)]
pub struct UploadService {
    requestor: Arc<dyn DataRequestor>,
}

impl UploadService {
    pub fn new(requestor: Arc<dyn DataRequestor>) -> Self {
        Self { requestor }
    }

    /// `{item_url}/{segments...}` with each segment percent-encoded
    fn item_path(item_url: &str, segments: &[&str]) -> Result<String> {
        let mut url = Url::parse(item_url)
            .map_err(|err| UploadError::param_error(format!("Invalid url {:?}: {}", item_url, err)))?;

        url.path_segments_mut()
            .map_err(|_| UploadError::param_error(format!("Url cannot be a base: {:?}", item_url)))?
            .pop_if_empty()
            .extend(segments);

        Ok(url.to_string())
    }

    pub async fn create_session(
        &self,
        item_url: &str,
        file_name: &str,
        file_size: u64,
        conflict_behavior: ConflictBehavior,
        etag: Option<&str>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<UploadSession> {
        let name_segment = format!("{}:", file_name);
        let url = Self::item_path(item_url, &[name_segment.as_str(), "createUploadSession"])?;

        let body = CreateSessionRequest {
            item: SessionItem {
                conflict_behavior,
                file_size,
                file_system_info: FileSystemInfo {
                    last_modified_date_time: last_modified,
                },
            },
        };

        let mut request = DataRequest::new("CreateUploadSession", RequestType::Post, url)
            .json(serde_json::to_value(&body)?)
            .header(PREFER, "synchronousmetadata")?;
        if let Some(etag) = etag {
            request = request.header(IF_MATCH, etag)?;
        }

        let response = self.requestor.send(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn upload_fragment(
        &self,
        session_url: &str,
        start_byte: u64,
        end_byte: u64,
        file_size: u64,
        content: Bytes,
        timeout: Duration,
        on_progress: Option<UploadProgressCallback>,
    ) -> Result<FragmentOutcome> {
        if end_byte <= start_byte {
            return Err(UploadError::param_error(format!(
                "Empty fragment {}-{}",
                start_byte, end_byte
            )));
        }

        let content_range = format!("bytes {}-{}/{}", start_byte, end_byte - 1, file_size);
        let mut request = DataRequest::new("UploadFragment", RequestType::Put, session_url)
            .without_authorization()
            .bytes(content)
            .timeout(timeout)
            .header(CONTENT_RANGE, &content_range)?;
        if let Some(callback) = on_progress {
            request = request.on_upload_progress(callback);
        }

        let response = self.requestor.send(request).await?;
        Self::parse_fragment_response(response)
    }

    fn parse_fragment_response(response: Value) -> Result<FragmentOutcome> {
        if response.get("id").is_some() {
            return Ok(FragmentOutcome::Completed(serde_json::from_value(response)?));
        }

        if response.is_null() {
            return Ok(FragmentOutcome::Pending(UploadSessionStatus::default()));
        }

        Ok(FragmentOutcome::Pending(serde_json::from_value(response)?))
    }

    pub async fn commit(
        &self,
        session_url: &str,
        item_url: &str,
        file_name: &str,
        conflict_behavior: ConflictBehavior,
        etag: Option<&str>,
    ) -> Result<UploadedItem> {
        let url = Self::item_path(item_url, &[file_name])?;
        let body = CommitRequest {
            conflict_behavior,
            source_url: session_url,
        };

        let mut request = DataRequest::new("CommitUpload", RequestType::Put, url)
            .json(serde_json::to_value(&body)?);
        if let Some(etag) = etag {
            request = request.header(IF_MATCH, etag)?;
        }

        let response = self.requestor.send(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn get_status(&self, session_url: &str) -> Result<UploadSessionStatus> {
        let request = DataRequest::new("GetUploadStatus", RequestType::Get, session_url)
            .without_authorization();

        let response = self.requestor.send(request).await?;
        if response.is_null() {
            return Ok(UploadSessionStatus::default());
        }
        Ok(serde_json::from_value(response)?)
    }

    pub async fn cancel_session(&self, session_url: &str) -> Result<()> {
        let request = DataRequest::new("CancelUploadSession", RequestType::Delete, session_url)
            .without_authorization();

        self.requestor.send(request).await?;
        Ok(())
    }
}
