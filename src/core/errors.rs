use std::sync::Arc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nested `error.{code, message, innererror}` body returned by the drive API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, rename = "innererror", alias = "innerError", skip_serializing_if = "Option::is_none")]
    pub inner_error: Option<Box<ServiceError>>,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            inner_error: None,
        }
    }

    pub fn with_inner(mut self, inner: ServiceError) -> Self {
        self.inner_error = Some(Box::new(inner));
        self
    }

    /// Codes ordered from the innermost error to this one. Levels without a code are skipped.
    pub fn codes(&self) -> Vec<&str> {
        let mut codes = Vec::new();
        let mut current = Some(self);
        while let Some(error) = current {
            if !error.code.is_empty() {
                codes.push(error.code.as_str());
            }
            current = error.inner_error.as_deref();
        }
        codes.reverse();
        codes
    }
}

/// Envelope used by the server for failed requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ServiceError,
}

/// A failed request as surfaced by the transport.
///
/// `status` is the HTTP status, or `0` when the request never produced a
/// response (connection refused, DNS, timeout, offline).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Request failed: status code {status}, message: {message}")]
pub struct RequestError {
    pub status: u16,
    pub message: String,
    pub error: Option<ServiceError>,
}

impl RequestError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
        }
    }

    pub fn with_service_error(mut self, error: ServiceError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Param error: {0}")]
    ParamError(String),

    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(Arc::new(err))
    }
}

impl From<reqwest::header::InvalidHeaderValue> for UploadError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::ParamError(format!("Invalid header value: {}", err))
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl UploadError {
    pub fn request(status: u16, message: impl Into<String>) -> Self {
        Self::Request(RequestError::new(status, message))
    }

    pub fn service(status: u16, error: ServiceError) -> Self {
        let message = error.message.clone();
        Self::Request(RequestError::new(status, message).with_service_error(error))
    }

    pub fn param_error(message: impl Into<String>) -> Self {
        Self::ParamError(message.into())
    }

    /// HTTP status of a request failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request(err) => Some(err.status),
            _ => None,
        }
    }

    /// Server error codes, innermost first.
    pub fn codes(&self) -> Vec<&str> {
        match self {
            Self::Request(RequestError { error: Some(error), .. }) => error.codes(),
            _ => Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_innermost_first() {
        let error = ServiceError::new("invalidRequest", "outer")
            .with_inner(ServiceError::new("resourceModified", "middle")
                .with_inner(ServiceError::new("entityTagDoesNotMatch", "inner")));

        assert_eq!(
            error.codes(),
            vec!["entityTagDoesNotMatch", "resourceModified", "invalidRequest"]
        );
    }

    #[test]
    fn test_deserialize_error_body() {
        let body = r#"{
            "error": {
                "code": "itemNotFound",
                "message": "The upload session was not found",
                "innererror": { "code": "uploadSessionNotFound" }
            }
        }"#;

        let response: ErrorResponse = serde_json::from_str(body).unwrap();
        let err = UploadError::service(404, response.error);

        assert_eq!(err.status(), Some(404));
        assert_eq!(err.codes(), vec!["uploadSessionNotFound", "itemNotFound"]);
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_inner_error_without_code() {
        let body = r#"{
            "error": {
                "code": "nameAlreadyExists",
                "message": "Name already exists",
                "innerError": { "request-id": "abc", "date": "2026-10-16T08:00:00" }
            }
        }"#;

        let response: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.error.codes(), vec!["nameAlreadyExists"]);
        assert!(response.error.inner_error.is_some());
    }

    #[test]
    fn test_non_request_errors_have_no_codes() {
        assert!(UploadError::Cancelled.codes().is_empty());
        assert_eq!(UploadError::Cancelled.status(), None);
        assert!(UploadError::Cancelled.is_cancelled());
    }
}
