use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use drive_upload::core::{
    ConflictResolver, Connectivity, RequestBody, RequestType, ServiceError, Sleeper, UploadContent,
};
use drive_upload::upload::state_machine::upgrade_speed;
use drive_upload::{
    ConflictBehavior, DataRequest, DataRequestor, MemoryContent, UploadConfiguration, UploadError,
    UploadService, UploadState, UploadStateMachine, Uploader,
};

const MIB: u64 = 1024 * 1024;
const ITEM_URL: &str = "https://graph.example.com/v1.0/me/drive/root:/Uploads";
const SESSION_URL: &str = "https://upload.example.com/session/abc";

/// 模拟服务端响应
enum Scripted {
    Ok(Value),
    Err(UploadError),
    Hang,
    /// Reports one more byte every interval and never finishes
    Trickle(Duration),
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    api_name: &'static str,
    request_type: RequestType,
    url: String,
    content_range: Option<String>,
    if_match: Option<String>,
    prefer: Option<String>,
    json: Option<Value>,
    needs_authorization: bool,
}

/// Answers requests from a script. Session deletes never consume the script.
#[derive(Default)]
struct MockRequestor {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockRequestor {
    fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn count(&self, request_type: RequestType) -> usize {
        self.requests().iter().filter(|r| r.request_type == request_type).count()
    }
}

fn header(request: &DataRequest, name: &str) -> Option<String> {
    request.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

#[async_trait]
impl DataRequestor for MockRequestor {
    async fn send(&self, request: DataRequest) -> drive_upload::Result<Value> {
        let json = match &request.body {
            RequestBody::Json(value) => Some(value.clone()),
            _ => None,
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            api_name: request.api_name,
            request_type: request.request_type,
            url: request.url.clone(),
            content_range: header(&request, "content-range"),
            if_match: header(&request, "if-match"),
            prefer: header(&request, "prefer"),
            json,
            needs_authorization: request.needs_authorization,
        });

        if request.request_type == RequestType::Delete {
            return Ok(Value::Null);
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Ok(value)) => {
                if let (Some(callback), RequestBody::Bytes(data)) = (&request.on_upload_progress, &request.body) {
                    callback(data.len() as u64);
                }
                Ok(value)
            }
            Some(Scripted::Err(err)) => Err(err),
            Some(Scripted::Hang) => futures::future::pending().await,
            Some(Scripted::Trickle(interval)) => {
                let mut sent = 0;
                loop {
                    tokio::time::sleep(interval).await;
                    sent += 1;
                    if let Some(callback) = &request.on_upload_progress {
                        callback(sent);
                    }
                }
            }
            None => Err(UploadError::request(400, format!("unscripted {}", request.api_name))),
        }
    }
}

#[derive(Default)]
struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

struct Offline;

impl Connectivity for Offline {
    fn is_online(&self) -> bool {
        false
    }
}

struct FixedResolver {
    choice: Option<ConflictBehavior>,
    prompts: Mutex<Vec<Option<u16>>>,
}

impl FixedResolver {
    fn new(choice: Option<ConflictBehavior>) -> Arc<Self> {
        Arc::new(Self {
            choice,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ConflictResolver for FixedResolver {
    async fn resolve_conflict(&self, error: &UploadError) -> Option<ConflictBehavior> {
        self.prompts.lock().unwrap().push(error.status());
        self.choice
    }
}

/// Pretends to hold `size` bytes without allocating them.
struct SizedContent {
    size: u64,
}

#[async_trait]
impl UploadContent for SizedContent {
    fn size(&self) -> u64 {
        self.size
    }

    async fn slice(&self, _start: u64, _end: u64) -> drive_upload::Result<Bytes> {
        Ok(Bytes::new())
    }
}

fn configuration(content: Arc<dyn UploadContent>, sleeper: &Arc<RecordingSleeper>) -> UploadConfiguration {
    UploadConfiguration::new(ITEM_URL, "report.bin", content)
        .with_sleeper(sleeper.clone())
}

fn machine(requestor: &Arc<MockRequestor>) -> UploadStateMachine {
    UploadStateMachine::new(UploadService::new(requestor.clone()))
}

fn session_state(ranges: &[&str]) -> UploadState {
    UploadState {
        session_url: Some(SESSION_URL.to_string()),
        next_expected_ranges: Some(ranges.iter().map(|r| r.to_string()).collect()),
        ..Default::default()
    }
}

fn session_response(ranges: &[&str]) -> Value {
    json!({
        "uploadUrl": SESSION_URL,
        "expirationDateTime": "2026-10-17T10:00:00Z",
        "nextExpectedRanges": ranges,
    })
}

fn item_response() -> Value {
    json!({ "id": "01ITEM", "name": "report.bin", "size": 10 * MIB })
}

#[tokio::test]
async fn test_fresh_state_creates_session() {
    let requestor = MockRequestor::new(vec![Scripted::Ok(session_response(&["0-"]))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: 1000 }), &sleeper).with_etag("\"etag-1\"");

    let state = machine(&requestor).advance_state(&config, UploadState::default()).await;

    assert!(state.error.is_none());
    assert_eq!(state.session_url.as_deref(), Some(SESSION_URL));
    assert_eq!(state.next_expected_ranges, Some(vec!["0-".to_string()]));

    let requests = requestor.requests();
    assert_eq!(requests.len(), 1);
    let create = &requests[0];
    assert_eq!(create.request_type, RequestType::Post);
    assert_eq!(create.url, format!("{}/report.bin:/createUploadSession", ITEM_URL));
    assert_eq!(create.if_match.as_deref(), Some("\"etag-1\""));
    assert_eq!(create.prefer.as_deref(), Some("synchronousmetadata"));
    assert!(create.needs_authorization);
    assert_eq!(
        create.json,
        Some(json!({
            "item": {
                "@name.conflictBehavior": "fail",
                "fileSize": 1000,
                "fileSystemInfo": {}
            }
        }))
    );
}

#[tokio::test]
async fn test_first_fragment_uses_max_size_at_full_speed() {
    let file_size = 8 * 60 * MIB;
    let requestor = MockRequestor::new(vec![Scripted::Ok(json!({ "nextExpectedRanges": [format!("{}-", 60 * MIB)] }))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: file_size }), &sleeper);

    let state = UploadState {
        speed: Some(1.0),
        ..session_state(&["0-"])
    };
    let state = machine(&requestor).advance_state(&config, state).await;

    let requests = requestor.requests();
    assert_eq!(requests[0].request_type, RequestType::Put);
    assert_eq!(requests[0].url, SESSION_URL);
    assert!(!requests[0].needs_authorization);
    assert_eq!(
        requests[0].content_range.as_deref(),
        Some(format!("bytes 0-{}/{}", 60 * MIB - 1, file_size).as_str())
    );
    assert_eq!(state.next_expected_ranges, Some(vec![format!("{}-", 60 * MIB)]));
    assert_eq!(state.speed, Some(1.0));
}

#[tokio::test]
async fn test_fragment_not_found_recreates_session() {
    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::request(404, "not found"))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: 4 * MIB }), &sleeper);

    let state = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;

    assert!(state.error.is_none());
    assert!(state.session_url.is_none());
    assert!(state.next_expected_ranges.is_none());
}

#[tokio::test]
async fn test_commit_session_failure_clears_session() {
    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::service(
        410,
        ServiceError::new("uploadSessionFailed", "session expired"),
    ))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: 4 * MIB }), &sleeper).with_commit(true);

    let state = machine(&requestor).advance_state(&config, session_state(&[])).await;

    assert_eq!(requestor.requests()[0].api_name, "CommitUpload");
    assert!(state.error.is_none());
    assert!(state.session_url.is_none());
}

#[tokio::test]
async fn test_fragment_conflict_prompts_caller() {
    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::request(409, "conflict"))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let resolver = FixedResolver::new(Some(ConflictBehavior::Rename));
    let config = configuration(Arc::new(SizedContent { size: 4 * MIB }), &sleeper)
        .with_conflict_resolver(resolver.clone());

    let state = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;

    assert_eq!(*resolver.prompts.lock().unwrap(), vec![Some(409)]);
    assert!(state.error.is_none());
    assert_eq!(state.conflict_behavior, Some(ConflictBehavior::Rename));
    assert_eq!(state.session_url.as_deref(), Some(SESSION_URL));
}

#[tokio::test]
async fn test_declined_conflict_is_terminal() {
    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::service(
        409,
        ServiceError::new("nameAlreadyExists", "exists"),
    ))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let resolver = FixedResolver::new(None);
    let config = configuration(Arc::new(SizedContent { size: 4 * MIB }), &sleeper)
        .with_conflict_resolver(resolver);

    let result = Uploader::with_service(UploadService::new(requestor.clone())).upload(&config).await;

    let err = result.unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(err.codes(), vec!["nameAlreadyExists"]);
    assert_eq!(requestor.count(RequestType::Delete), 0);
}

#[tokio::test]
async fn test_terminal_state_issues_no_requests() {
    let requestor = MockRequestor::new(vec![]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: 10 }), &sleeper);
    let machine = machine(&requestor);

    let failed = session_state(&["0-"]).with_error(UploadError::request(401, "unauthenticated"));
    let state = machine.advance_state(&config, failed).await;
    assert_eq!(state.error.and_then(|e| e.status()), Some(401));

    let done = UploadState {
        item: serde_json::from_value(item_response()).ok(),
        ..Default::default()
    };
    let state = machine.advance_state(&config, done).await;
    assert!(state.item.is_some());

    assert!(requestor.requests().is_empty());
    assert!(sleeper.waits().is_empty());
}

#[tokio::test]
async fn test_transient_failures_back_off_exponentially() {
    let requestor = MockRequestor::new(vec![
        Scripted::Err(UploadError::request(503, "busy")),
        Scripted::Err(UploadError::request(0, "offline")),
        Scripted::Err(UploadError::request(500, "boom")),
        Scripted::Ok(session_response(&["0-"])),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: 100 }), &sleeper);
    let machine = machine(&requestor);

    let mut state = UploadState::default();
    for expected in [500, 1000, 2000] {
        state = machine.advance_state(&config, state).await;
        assert!(state.error.is_none());
        assert_eq!(state.wait_duration, Some(Duration::from_millis(expected)));
    }

    state = machine.advance_state(&config, state).await;
    assert_eq!(state.session_url.as_deref(), Some(SESSION_URL));
    assert_eq!(state.wait_duration, None);
    assert_eq!(
        sleeper.waits(),
        vec![Duration::from_millis(500), Duration::from_millis(1000), Duration::from_millis(2000)]
    );
}

#[tokio::test]
async fn test_unexpected_status_uses_attempt_budget() {
    let requestor = MockRequestor::new(vec![
        Scripted::Err(UploadError::request(302, "moved")),
        Scripted::Err(UploadError::request(302, "moved")),
        Scripted::Err(UploadError::request(302, "moved")),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: 100 }), &sleeper).with_max_retry_attempts(2);
    let machine = machine(&requestor);

    let mut state = UploadState {
        session_url: Some(SESSION_URL.to_string()),
        ..Default::default()
    };

    state = machine.advance_state(&config, state).await;
    assert_eq!(state.attempts_remaining, Some(1));
    state = machine.advance_state(&config, state).await;
    assert_eq!(state.attempts_remaining, Some(0));
    state = machine.advance_state(&config, state).await;
    assert_eq!(state.error.as_ref().and_then(|e| e.status()), Some(302));

    assert!(requestor.requests().iter().all(|r| r.api_name == "GetUploadStatus"));
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(1), Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_invalid_range_waits_and_keeps_ranges() {
    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::service(
        416,
        ServiceError::new("invalidRange", "overlap"),
    ))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: MIB }), &sleeper);

    let state = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;

    assert!(state.error.is_none());
    assert_eq!(state.next_expected_ranges, Some(vec!["0-".to_string()]));
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_network_failure_during_fragment() {
    let sleeper = Arc::new(RecordingSleeper::default());

    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::request(0, "reset"))]);
    let config = configuration(Arc::new(SizedContent { size: MIB }), &sleeper);
    let online = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;
    assert!(online.error.is_none());
    assert_eq!(online.speed, Some(1.0 / 64.0));
    assert!(sleeper.waits().is_empty());

    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::request(0, "reset"))]);
    let config = config.with_connectivity(Arc::new(Offline));
    let offline = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;
    assert!(offline.error.is_none());
    assert_eq!(offline.speed, Some(1.0 / 8.0));
    assert_eq!(offline.wait_duration, Some(Duration::from_millis(500)));
}

#[tokio::test]
async fn test_throttled_fragment_slows_down() {
    let requestor = MockRequestor::new(vec![Scripted::Err(UploadError::request(503, "throttled"))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: MIB }), &sleeper);

    let state = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;

    assert!(state.error.is_none());
    assert_eq!(state.speed, Some(1.0 / 16.0));
    assert_eq!(sleeper.waits(), vec![Duration::from_millis(500)]);
}

#[tokio::test]
async fn test_fast_fragment_upgrades_speed() {
    let requestor = MockRequestor::new(vec![Scripted::Ok(json!({ "nextExpectedRanges": ["7864320-"] }))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(MemoryContent::new(vec![0u8; 10 * MIB as usize])), &sleeper);

    let state = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;

    assert!(state.error.is_none());
    assert_eq!(state.next_expected_ranges, Some(vec!["7864320-".to_string()]));
    assert_eq!(state.speed, Some(upgrade_speed(1.0 / 8.0)));
    assert!(state.speed.unwrap() > 1.0 / 8.0);
}

#[tokio::test]
async fn test_slow_fragment_is_aborted_and_downgraded() {
    let requestor = MockRequestor::new(vec![Scripted::Trickle(Duration::from_millis(1100))]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(MemoryContent::new(vec![0u8; MIB as usize])), &sleeper)
        .with_fragment_timeout(Duration::from_secs(10));

    let state = machine(&requestor).advance_state(&config, session_state(&["0-"])).await;

    assert!(state.error.is_none());
    assert!(state.next_expected_ranges.is_none());
    assert_eq!(state.speed, Some(1.0 / 64.0));
    assert_eq!(state.session_url.as_deref(), Some(SESSION_URL));
    assert_eq!(requestor.count(RequestType::Put), 1);
    assert!(sleeper.waits().is_empty());
}

#[tokio::test]
async fn test_finished_session_without_commit_is_discarded() {
    let requestor = MockRequestor::new(vec![]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(SizedContent { size: MIB }), &sleeper);

    let state = machine(&requestor).advance_state(&config, session_state(&[])).await;

    assert_eq!(requestor.count(RequestType::Delete), 1);
    assert!(state.error.is_none());
    assert!(state.session_url.is_none());
    assert!(state.next_expected_ranges.is_none());
}

#[tokio::test]
async fn test_upload_in_two_fragments() {
    let file_size = 10 * MIB;
    let first_end = MIB * 60 / 8;
    let requestor = MockRequestor::new(vec![
        Scripted::Ok(session_response(&["0-"])),
        Scripted::Ok(json!({ "nextExpectedRanges": [format!("{}-", first_end)] })),
        Scripted::Ok(item_response()),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let progress = Arc::new(Mutex::new(Vec::new()));
    let config = configuration(Arc::new(MemoryContent::new(vec![1u8; file_size as usize])), &sleeper)
        .with_progress({
            let progress = progress.clone();
            Arc::new(move |p: drive_upload::UploadProgress| progress.lock().unwrap().push(p.uploaded_bytes))
        });

    let item = Uploader::new(requestor.clone()).upload(&config).await.unwrap();

    assert_eq!(item.id, "01ITEM");
    let ranges: Vec<_> = requestor.requests().iter().filter_map(|r| r.content_range.clone()).collect();
    assert_eq!(
        ranges,
        vec![
            format!("bytes 0-{}/{}", first_end - 1, file_size),
            format!("bytes {}-{}/{}", first_end, file_size - 1, file_size),
        ]
    );
    assert_eq!(progress.lock().unwrap().last(), Some(&file_size));
    assert_eq!(requestor.count(RequestType::Delete), 0);
}

#[tokio::test]
async fn test_upload_with_commit() {
    let requestor = MockRequestor::new(vec![
        Scripted::Ok(session_response(&["0-"])),
        Scripted::Ok(json!({ "expirationDateTime": "2026-10-17T10:00:00Z" })),
        Scripted::Ok(item_response()),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(MemoryContent::new(vec![0u8; 1000])), &sleeper)
        .with_commit(true)
        .with_etag("\"v2\"");

    let item = Uploader::new(requestor.clone()).upload(&config).await.unwrap();
    assert_eq!(item.id, "01ITEM");

    let requests = requestor.requests();
    let commit = requests.last().unwrap();
    assert_eq!(commit.api_name, "CommitUpload");
    assert_eq!(commit.url, format!("{}/report.bin", ITEM_URL));
    assert_eq!(commit.if_match.as_deref(), Some("\"v2\""));
    assert_eq!(
        commit.json,
        Some(json!({
            "@name.conflictBehavior": "fail",
            "@content.sourceUrl": SESSION_URL,
        }))
    );
}

#[tokio::test]
async fn test_fatal_error_cancels_session() {
    let requestor = MockRequestor::new(vec![
        Scripted::Ok(session_response(&["0-"])),
        Scripted::Err(UploadError::service(507, ServiceError::new("quotaLimitReached", "full"))),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(MemoryContent::new(vec![0u8; 1000])), &sleeper);

    let err = Uploader::new(requestor.clone()).upload(&config).await.unwrap_err();

    assert_eq!(err.status(), Some(507));
    assert_eq!(err.codes(), vec!["quotaLimitReached"]);
    let last = requestor.requests().last().cloned().unwrap();
    assert_eq!(last.request_type, RequestType::Delete);
    assert_eq!(last.url, SESSION_URL);
}

#[tokio::test]
async fn test_cancellation_aborts_fragment_and_cleans_up_once() {
    let requestor = MockRequestor::new(vec![
        Scripted::Ok(session_response(&["0-"])),
        Scripted::Hang,
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = configuration(Arc::new(MemoryContent::new(vec![0u8; 1000])), &sleeper);
    let cancellation_token = CancellationToken::new();

    let uploader = Uploader::new(requestor.clone());
    let upload = uploader.upload_with_cancellation(&config, cancellation_token.clone());
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancellation_token.cancel();
    };

    let (result, _) = tokio::join!(upload, cancel);

    assert!(matches!(result, Err(UploadError::Cancelled)));
    assert_eq!(requestor.count(RequestType::Put), 1);
    assert_eq!(requestor.count(RequestType::Delete), 1);
}
