use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::core::{DataRequestor, Result, UploadConfiguration, UploadError, UploadState, UploadedItem};
use super::service::UploadService;
use super::state_machine::UploadStateMachine;

/// Drives the state machine until the upload produces an item or gives up.
#[derive(Clone)]
pub struct Uploader {
    service: UploadService,
}

impl Uploader {
    pub fn new(requestor: Arc<dyn DataRequestor>) -> Self {
        Self {
            service: UploadService::new(requestor),
        }
    }

    pub fn with_service(service: UploadService) -> Self {
        Self { service }
    }

    pub async fn upload(&self, config: &UploadConfiguration) -> Result<UploadedItem> {
        self.upload_with_cancellation(config, CancellationToken::new()).await
    }

    /// Like [`Uploader::upload`]; cancelling `cancellation_token` aborts the
    /// in-flight request and ends with [`UploadError::Cancelled`].
    pub async fn upload_with_cancellation(
        &self,
        config: &UploadConfiguration,
        cancellation_token: CancellationToken,
    ) -> Result<UploadedItem> {
        let machine = UploadStateMachine::new(self.service.clone());
        let upload_id = machine.upload_id();
        log::info!("[{}] starting upload of {} ({} bytes)", upload_id, config.file_name, config.file_size());

        let mut state = UploadState::default();
        loop {
            if let Some(item) = state.item.take() {
                log::info!("[{}] upload finished, item {}", upload_id, item.id);
                return Ok(item);
            }

            if let Some(error) = state.error.take() {
                log::warn!("[{}] upload failed: {}", upload_id, error);
                self.cleanup(&machine, state.session_url.as_deref()).await;
                return Err(error);
            }

            // 执行
            state = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => state.with_error(UploadError::Cancelled),
                next = machine.advance_state(config, state.clone()) => next,
            };
        }
    }

    async fn cleanup(&self, machine: &UploadStateMachine, session_url: Option<&str>) {
        let Some(session_url) = session_url else {
            return;
        };

        if let Err(err) = machine.service().cancel_session(session_url).await {
            log::warn!("[{}] failed to cancel upload session: {}", machine.upload_id(), err);
        }
    }
}
