use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, Method};
use serde_json::Value;
use crate::core::{
    DataRequest, DataRequestor, ErrorResponse, RequestBody, RequestType, Result, UploadError,
};
use super::progress_stream::{pieces, ProgressStream};

/// [`DataRequestor`] on top of a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpRequestor {
    client: Client,
    access_token: Option<String>,
}

impl HttpRequestor {
    pub fn new(access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .tcp_nodelay(true)
            .build()
            .map_err(|err| UploadError::param_error(format!("Failed to build http client: {}", err)))?;

        Ok(Self::with_client(client, access_token))
    }

    pub fn with_client(client: Client, access_token: Option<String>) -> Self {
        Self {
            client,
            access_token,
        }
    }

    fn method(request_type: RequestType) -> Method {
        match request_type {
            RequestType::Get => Method::GET,
            RequestType::Post => Method::POST,
            RequestType::Put => Method::PUT,
            RequestType::Delete => Method::DELETE,
        }
    }

    /// No response at all is reported as status 0.
    fn transport_error(err: reqwest::Error) -> UploadError {
        let status = err.status().map(|status| status.as_u16()).unwrap_or(0);
        UploadError::request(status, err.to_string())
    }

    pub(crate) fn error_from_body(status: u16, body: &[u8]) -> UploadError {
        match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(response) => UploadError::service(status, response.error),
            Err(_) => {
                let message = String::from_utf8_lossy(body).trim().to_string();
                let message = if message.is_empty() {
                    reqwest::StatusCode::from_u16(status)
                        .ok()
                        .and_then(|status| status.canonical_reason())
                        .unwrap_or("Unknown error")
                        .to_string()
                } else {
                    message
                };
                UploadError::request(status, message)
            }
        }
    }
}

#[async_trait]
impl DataRequestor for HttpRequestor {
    async fn send(&self, request: DataRequest) -> Result<Value> {
        let DataRequest {
            api_name,
            url,
            request_type,
            body,
            headers,
            timeout,
            on_upload_progress,
            needs_authorization,
            use_authorization_headers,
            access_token,
        } = request;

        let mut builder = self.client
            .request(Self::method(request_type), &url)
            .headers(headers);

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        if needs_authorization {
            if let Some(token) = access_token.as_ref().or(self.access_token.as_ref()) {
                builder = if use_authorization_headers {
                    builder.bearer_auth(token)
                } else {
                    builder.query(&[("access_token", token)])
                };
            }
        }

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(data) => {
                let builder = builder.header(CONTENT_LENGTH, data.len());
                match on_upload_progress {
                    Some(callback) => builder.body(Body::wrap_stream(ProgressStream::new(pieces(data), callback))),
                    None => builder.body(data),
                }
            }
        };

        let response = builder.send().await.map_err(Self::transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(Self::transport_error)?;

        if !status.is_success() {
            log::debug!("{} failed with HTTP {}", api_name, status);
            return Err(Self::error_from_body(status.as_u16(), &bytes));
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}
