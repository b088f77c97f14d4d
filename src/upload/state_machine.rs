use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::core::{
    ByteRange, ProgressCallback, UploadConfiguration, UploadError, UploadId, UploadProgress,
    UploadProgressCallback, UploadState,
};
use crate::utils::retry::RetryStrategy;
use super::bandwidth::BandwidthVerifier;
use super::constants::{
    DISCRETE_CHUNK_SIZE, FAST_DOWNGRADE_FACTOR, INITIAL_SPEED, INVALID_RANGE_DELAY,
    MAX_FRAGMENT_SIZE, MAX_SPEED, MIN_FRAGMENT_SIZE, MIN_SPEED, SLOW_DOWNGRADE_FACTOR,
    SPEED_UPGRADE_FACTOR,
};
use super::service::{FragmentOutcome, UploadService};

const CONFLICT_CODES: &[&str] = &[
    "entityTagDoesNotMatch",
    "resourceModified",
    "versionNumberDoesNotMatch",
    "nameAlreadyExists",
];

const SESSION_CODES: &[&str] = &["uploadSessionFailed", "uploadSessionNotFound"];

const FATAL_CODES: &[&str] = &["unauthenticated", "lockMismatch", "quotaLimitReached"];

/// Which step produced an error. Some codes mean different things per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSite {
    CreateSession,
    GetStatus,
    UploadFragment,
    Commit,
}

/// One entry of an error's code chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode<'a> {
    Named(&'a str),
    Status(u16),
}

/// How an error gets resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recovery {
    /// Ask the caller for a conflict behavior
    PromptConflict,
    /// Forget the session so the next step creates a new one
    ResetSession,
    /// Wait a fixed interval and carry on
    Wait(Duration),
    /// Shrink fragments and retry
    FastDowngrade,
    /// Exponential backoff, retried forever
    Backoff,
    /// Fixed wait paid from the attempt budget
    RetryAttempt,
    Fatal,
}

/// Codes of `error` from the innermost server code out to the HTTP status.
pub fn error_codes(error: &UploadError) -> Vec<ErrorCode<'_>> {
    let mut codes: Vec<ErrorCode<'_>> = error.codes().into_iter().map(ErrorCode::Named).collect();
    if let Some(status) = error.status() {
        codes.push(ErrorCode::Status(status));
    }
    codes
}

fn classify_for_site(site: ErrorSite, code: ErrorCode<'_>, online: bool) -> Option<Recovery> {
    if site != ErrorSite::UploadFragment {
        return None;
    }

    match code {
        // overlapping upload from an earlier retry, settles by itself
        ErrorCode::Named("invalidRange") | ErrorCode::Status(416) => Some(Recovery::Wait(INVALID_RANGE_DELAY)),
        ErrorCode::Status(0) if online => Some(Recovery::FastDowngrade),
        _ => None,
    }
}

fn classify_general(code: ErrorCode<'_>, attempts_remaining: u32) -> Option<Recovery> {
    match code {
        ErrorCode::Named(name) if CONFLICT_CODES.contains(&name) => Some(Recovery::PromptConflict),
        ErrorCode::Named(name) if SESSION_CODES.contains(&name) => Some(Recovery::ResetSession),
        ErrorCode::Named(name) if FATAL_CODES.contains(&name) => Some(Recovery::Fatal),
        ErrorCode::Named(_) => None,
        ErrorCode::Status(409 | 412) => Some(Recovery::PromptConflict),
        ErrorCode::Status(404 | 410) => Some(Recovery::ResetSession),
        ErrorCode::Status(401 | 423 | 501 | 507) => Some(Recovery::Fatal),
        ErrorCode::Status(429) => Some(Recovery::Backoff),
        ErrorCode::Status(400..=499) => Some(Recovery::Fatal),
        ErrorCode::Status(0 | 500..=599) => Some(Recovery::Backoff),
        ErrorCode::Status(_) if attempts_remaining > 0 => Some(Recovery::RetryAttempt),
        ErrorCode::Status(_) => None,
    }
}

/// Walks the code chain, step-specific rules first. The first defined result wins.
pub fn classify_error(site: ErrorSite, error: &UploadError, online: bool, attempts_remaining: u32) -> Recovery {
    let codes = error_codes(error);

    codes.iter()
        .find_map(|code| classify_for_site(site, *code, online))
        .or_else(|| codes.iter().find_map(|code| classify_general(*code, attempts_remaining)))
        .unwrap_or(Recovery::Fatal)
}

fn is_throttled(error: &UploadError) -> bool {
    matches!(error.status(), Some(429 | 503))
}

/// Picks the server-requested range with the lowest start below `file_size`.
///
/// Ranges are `"start-"` or `"start-endInclusive"`; anything else is skipped.
pub fn next_range(ranges: &[String], file_size: u64) -> Option<ByteRange> {
    ranges.iter()
        .filter_map(|range| parse_range(range, file_size))
        .filter(|range| range.start < file_size && !range.is_empty())
        .min_by_key(|range| range.start)
}

fn parse_range(range: &str, file_size: u64) -> Option<ByteRange> {
    let (start, end) = range.trim().split_once('-')?;
    let start = start.parse::<u64>().ok()?;

    let end = if end.is_empty() {
        file_size
    } else {
        let end_inclusive = end.parse::<u64>().ok()?;
        end_inclusive.saturating_add(1).min(file_size)
    };

    Some(ByteRange::new(start, end))
}

pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return INITIAL_SPEED;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

pub fn upgrade_speed(speed: f64) -> f64 {
    clamp_speed(speed * SPEED_UPGRADE_FACTOR)
}

pub fn downgrade_speed(speed: f64, factor: f64) -> f64 {
    clamp_speed(speed / factor)
}

/// Fragment length for `speed`, aligned to the server's chunk granularity.
pub fn fragment_size(speed: f64) -> u64 {
    let raw = (clamp_speed(speed) * MAX_FRAGMENT_SIZE as f64) as u64;

    let aligned = if raw > DISCRETE_CHUNK_SIZE {
        raw / DISCRETE_CHUNK_SIZE * DISCRETE_CHUNK_SIZE
    } else {
        raw / MIN_FRAGMENT_SIZE * MIN_FRAGMENT_SIZE
    };

    aligned.clamp(MIN_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE)
}

fn report(callback: &Option<ProgressCallback>, uploaded_bytes: u64, total_bytes: u64) {
    if let Some(callback) = callback {
        callback(UploadProgress::new(uploaded_bytes, total_bytes));
    }
}

/// Performs one step of an upload per call: `state` in, next `state` out.
pub struct UploadStateMachine {
    service: UploadService,
    upload_id: UploadId,
}

impl UploadStateMachine {
    pub fn new(service: UploadService) -> Self {
        Self {
            service,
            upload_id: UploadId::new(),
        }
    }

    pub fn with_upload_id(mut self, upload_id: UploadId) -> Self {
        self.upload_id = upload_id;
        self
    }

    pub fn upload_id(&self) -> UploadId {
        self.upload_id
    }

    pub fn service(&self) -> &UploadService {
        &self.service
    }

    /// Runs exactly one network step. Terminal states come back untouched.
    pub async fn advance_state(&self, config: &UploadConfiguration, state: UploadState) -> UploadState {
        if state.is_terminal() {
            return state;
        }

        let session_url = state.session_url.clone();
        let ranges = state.next_expected_ranges.clone();

        let (site, next) = match (session_url, ranges) {
            (None, _) => (ErrorSite::CreateSession, self.create_session(config, state).await),
            (Some(session_url), None) => (ErrorSite::GetStatus, self.get_status(&session_url, state).await),
            (Some(session_url), Some(ranges)) => match next_range(&ranges, config.file_size()) {
                Some(range) => (
                    ErrorSite::UploadFragment,
                    self.upload_fragment(config, &session_url, range, state).await,
                ),
                None if config.use_commit => (ErrorSite::Commit, self.commit(config, &session_url, state).await),
                None => (ErrorSite::Commit, self.discard_session(&session_url, state).await),
            },
        };

        if next.error.is_some() {
            return self.handle_error(config, site, next).await;
        }

        UploadState {
            wait_duration: None,
            attempts_remaining: None,
            ..next
        }
    }

    async fn create_session(&self, config: &UploadConfiguration, state: UploadState) -> UploadState {
        let conflict_behavior = state.conflict_behavior.unwrap_or_default();
        log::debug!(
            "[{}] creating upload session for {} ({} bytes, conflict behavior {})",
            self.upload_id, config.file_name, config.file_size(), conflict_behavior
        );

        let result = self.service.create_session(
            &config.item_url,
            &config.file_name,
            config.file_size(),
            conflict_behavior,
            config.etag.as_deref(),
            config.last_modified,
        ).await;

        match result {
            Ok(session) => UploadState {
                session_url: Some(session.upload_url),
                next_expected_ranges: Some(session.next_expected_ranges),
                ..state
            },
            Err(err) => state.with_error(err),
        }
    }

    async fn get_status(&self, session_url: &str, state: UploadState) -> UploadState {
        log::debug!("[{}] querying upload session status", self.upload_id);

        match self.service.get_status(session_url).await {
            Ok(status) => UploadState {
                next_expected_ranges: Some(status.next_expected_ranges.unwrap_or_default()),
                ..state
            },
            Err(err) => state.with_error(err),
        }
    }

    async fn upload_fragment(
        &self,
        config: &UploadConfiguration,
        session_url: &str,
        range: ByteRange,
        state: UploadState,
    ) -> UploadState {
        let file_size = config.file_size();
        let speed = clamp_speed(state.speed.unwrap_or(INITIAL_SPEED));
        let start = range.start;
        let end = range.end.min(start + fragment_size(speed));

        let content = match config.content.slice(start, end).await {
            Ok(content) => content,
            Err(err) => return state.with_error(err),
        };

        log::debug!(
            "[{}] uploading fragment {}-{} of {} (speed {:.5})",
            self.upload_id, start, end, file_size, speed
        );

        let verifier = Arc::new(BandwidthVerifier::new(config.fragment_timeout, end - start));
        let abort = CancellationToken::new();

        let on_progress: UploadProgressCallback = {
            let verifier = verifier.clone();
            let abort = abort.clone();
            let callback = config.on_progress.clone();
            Arc::new(move |sent: u64| {
                report(&callback, start + sent, file_size);
                if !verifier.has_remaining_capacity(sent) {
                    abort.cancel();
                }
            })
        };

        let upload = self.service.upload_fragment(
            session_url,
            start,
            end,
            file_size,
            content,
            config.fragment_timeout,
            Some(on_progress),
        );

        // 带宽不足时主动取消当前分片
        let result = tokio::select! {
            result = upload => Some(result),
            _ = abort.cancelled() => None,
        };

        match result {
            None => {
                let speed = downgrade_speed(speed, FAST_DOWNGRADE_FACTOR);
                log::info!(
                    "[{}] fragment {}-{} cannot finish in time, retrying with speed {:.5}",
                    self.upload_id, start, end, speed
                );
                UploadState {
                    next_expected_ranges: None,
                    speed: Some(speed),
                    ..state
                }
            }
            Some(Ok(FragmentOutcome::Completed(item))) => {
                report(&config.on_progress, file_size, file_size);
                UploadState {
                    item: Some(item),
                    speed: Some(speed),
                    ..state
                }
            }
            Some(Ok(FragmentOutcome::Pending(status))) => {
                report(&config.on_progress, end, file_size);
                let speed = if verifier.had_extra_capacity() {
                    upgrade_speed(speed)
                } else {
                    speed
                };
                UploadState {
                    next_expected_ranges: Some(status.next_expected_ranges.unwrap_or_default()),
                    speed: Some(speed),
                    ..state
                }
            }
            Some(Err(err)) => UploadState {
                speed: Some(speed),
                ..state
            }.with_error(err),
        }
    }

    async fn commit(&self, config: &UploadConfiguration, session_url: &str, state: UploadState) -> UploadState {
        let conflict_behavior = state.conflict_behavior.unwrap_or_default();
        log::debug!("[{}] committing upload session ({})", self.upload_id, conflict_behavior);

        let result = self.service.commit(
            session_url,
            &config.item_url,
            &config.file_name,
            conflict_behavior,
            config.etag.as_deref(),
        ).await;

        match result {
            Ok(item) => {
                report(&config.on_progress, config.file_size(), config.file_size());
                UploadState {
                    item: Some(item),
                    ..state
                }
            }
            Err(err) => state.with_error(err),
        }
    }

    /// Nothing left to send and no commit step: start over with a new session.
    async fn discard_session(&self, session_url: &str, state: UploadState) -> UploadState {
        log::info!("[{}] session has no remaining ranges, discarding it", self.upload_id);

        if let Err(err) = self.service.cancel_session(session_url).await {
            log::warn!("[{}] failed to cancel upload session: {}", self.upload_id, err);
        }

        UploadState {
            session_url: None,
            next_expected_ranges: None,
            ..state
        }
    }

    async fn handle_error(&self, config: &UploadConfiguration, site: ErrorSite, state: UploadState) -> UploadState {
        let Some(error) = state.error.clone() else {
            return state;
        };

        let mut state = state;
        if site == ErrorSite::UploadFragment && is_throttled(&error) {
            let speed = downgrade_speed(state.speed.unwrap_or(INITIAL_SPEED), SLOW_DOWNGRADE_FACTOR);
            state = UploadState {
                speed: Some(speed),
                ..state
            };
        }

        let attempts_remaining = state.attempts_remaining.unwrap_or(config.max_retry_attempts);
        let online = config.connectivity.is_online();
        let recovery = classify_error(site, &error, online, attempts_remaining);

        log::debug!("[{}] {:?} failed ({}), recovery: {:?}", self.upload_id, site, error, recovery);

        match recovery {
            Recovery::PromptConflict => {
                let choice = match &config.conflict_resolver {
                    Some(resolver) => resolver.resolve_conflict(&error).await,
                    None => None,
                };
                match choice {
                    Some(conflict_behavior) => UploadState {
                        error: None,
                        conflict_behavior: Some(conflict_behavior),
                        ..state
                    },
                    None => state,
                }
            }
            Recovery::ResetSession => UploadState {
                error: None,
                session_url: None,
                next_expected_ranges: None,
                ..state
            },
            Recovery::Wait(delay) => {
                config.sleeper.sleep(delay).await;
                UploadState {
                    error: None,
                    ..state
                }
            }
            Recovery::FastDowngrade => {
                let speed = downgrade_speed(state.speed.unwrap_or(INITIAL_SPEED), FAST_DOWNGRADE_FACTOR);
                UploadState {
                    error: None,
                    speed: Some(speed),
                    ..state
                }
            }
            Recovery::Backoff => {
                let delay = RetryStrategy::transient().next_delay(state.wait_duration);
                log::info!("[{}] transient failure, retrying in {:?}", self.upload_id, delay);
                config.sleeper.sleep(delay).await;
                UploadState {
                    error: None,
                    wait_duration: Some(delay),
                    ..state
                }
            }
            Recovery::RetryAttempt => {
                config.sleeper.sleep(RetryStrategy::attempts().next_delay(None)).await;
                UploadState {
                    error: None,
                    attempts_remaining: Some(attempts_remaining.saturating_sub(1)),
                    ..state
                }
            }
            Recovery::Fatal => {
                log::warn!("[{}] unrecoverable error: {}", self.upload_id, error);
                state
            }
        }
    }
}
