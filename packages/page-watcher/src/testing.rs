//! Testing utilities including mock implementations.
//!
//! These let the watch loop run end to end without a network, a real
//! notification sink or the wall clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, NotifyError, NotifyResult, StorageError, StorageResult};
use crate::fetcher::Target;
use crate::storage::MemoryStore;
use crate::traits::{Clock, HttpResponse, HttpTransport, Notifier, PageFetcher, StateStore};
use crate::types::{ChangeEvent, FetchResult, RawDocument, WatchState};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// ScriptedTransport
// =============================================================================

/// HTTP transport that replays a fixed script of responses.
///
/// Clones share the script and the call counter.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<HttpResponse, FetchError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(self, body: &str) -> Self {
        self.push(Ok(response(200, body, None)))
    }

    pub fn then_status(self, status: u16) -> Self {
        self.push(Ok(response(status, "", None)))
    }

    /// A 429 carrying `Retry-After`.
    pub fn then_throttled(self, retry_after: Duration) -> Self {
        self.push(Ok(response(429, "", Some(retry_after))))
    }

    pub fn then_error(self, error: FetchError) -> Self {
        self.push(Err(error))
    }

    /// Number of requests made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(self, entry: Result<HttpResponse, FetchError>) -> Self {
        lock(&self.script).push_back(entry);
        self
    }
}

fn response(status: u16, body: &str, retry_after: Option<Duration>) -> HttpResponse {
    HttpResponse {
        status,
        final_url: "https://example.com/".to_string(),
        body: body.to_string(),
        retry_after,
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, _target: &Target) -> Result<HttpResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
    }
}

// =============================================================================
// ScriptedFetcher
// =============================================================================

/// Page fetcher that hands out pages and failures in order. The last
/// entry repeats once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<VecDeque<FetchResult>>>,
    last: Arc<Mutex<Option<FetchResult>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher that always returns `body`.
    pub fn serving(body: &str) -> Self {
        Self::new().then_page(body)
    }

    pub fn then_page(self, body: &str) -> Self {
        self.push(FetchResult::Success {
            document: RawDocument {
                body: body.to_string(),
                final_url: "https://example.com/".to_string(),
                status: 200,
            },
            fetched_at: Utc::now(),
            attempt_count: 1,
        })
    }

    pub fn then_failure(self, reason: FetchError, attempt_count: u32) -> Self {
        self.push(FetchResult::Failure {
            reason,
            attempt_count,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(self, result: FetchResult) -> Self {
        lock(&self.script).push_back(result);
        self
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, _target: &Target) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = lock(&self.last);
        if let Some(next) = lock(&self.script).pop_front() {
            *last = Some(next);
        }
        last.clone().unwrap_or_else(|| FetchResult::Failure {
            reason: FetchError::Network("nothing scripted".into()),
            attempt_count: 1,
        })
    }
}

// =============================================================================
// RecordingNotifier
// =============================================================================

/// Notifier that records every event it is handed.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<ChangeEvent>>>,
    attempts: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Successfully delivered events
    pub fn delivered(&self) -> Vec<ChangeEvent> {
        lock(&self.delivered).clone()
    }

    /// Delivery attempts including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "sink unavailable".to_string(),
            });
        }
        lock(&self.delivered).push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// =============================================================================
// FlakyStore
// =============================================================================

/// Memory store whose saves can be made to fail.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_saves: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` saves.
    pub fn failing_saves(self, count: usize) -> Self {
        self.fail_saves.store(count, Ordering::SeqCst);
        self
    }

    pub fn snapshot(&self) -> Option<WatchState> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self) -> StorageResult<Option<WatchState>> {
        self.inner.load().await
    }

    async fn save(&self, state: &WatchState) -> StorageResult<()> {
        let failing = self
            .fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.save(state).await
    }
}

// =============================================================================
// ManualClock
// =============================================================================

/// Clock that never waits. Sleeping records the duration and advances
/// `now` by it.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
    cancel: Arc<Mutex<Option<(usize, CancellationToken)>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
            cancel: Arc::new(Mutex::new(None)),
        }
    }
}

impl ManualClock {
    /// Cancel `token` once `sleeps` sleeps have been recorded.
    pub fn cancel_after(self, sleeps: usize, token: CancellationToken) -> Self {
        *lock(&self.cancel) = Some((sleeps, token));
        self
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    async fn sleep(&self, duration: Duration) {
        let count = {
            let mut sleeps = lock(&self.sleeps);
            sleeps.push(duration);
            sleeps.len()
        };
        if let Ok(step) = chrono::Duration::from_std(duration) {
            let mut now = lock(&self.now);
            *now += step;
        }
        if let Some((after, token)) = lock(&self.cancel).as_ref() {
            if count >= *after {
                token.cancel();
            }
        }
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// StubServer
// =============================================================================

/// Canned reply for [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// HTTP/1.1 server on localhost that answers every request with the same
/// response and records the raw requests. A silent server accepts
/// connections and never answers.
pub struct StubServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(response: StubResponse) -> std::io::Result<Self> {
        Self::listen(Some(response)).await
    }

    pub async fn silent() -> std::io::Result<Self> {
        Self::listen(None).await
    }

    async fn listen(response: Option<StubResponse>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                match &response {
                    Some(response) => {
                        let response = response.clone();
                        let recorded = recorded.clone();
                        tokio::spawn(async move {
                            let _ = answer(stream, &response, &recorded).await;
                        });
                    }
                    None => held.push(stream),
                }
            }
        });

        Ok(Self {
            base_url,
            requests,
            task,
        })
    }

    /// `http://127.0.0.1:<port>`, no trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Raw requests received so far, head and body
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    mut stream: TcpStream,
    response: &StubResponse,
    recorded: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if request_complete(&raw) {
            break;
        }
    }
    lock(recorded).push(String::from_utf8_lossy(&raw).into_owned());

    let mut head = format!("HTTP/1.1 {} Stub\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.shutdown().await
}

/// Headers received and, when announced, the whole body.
fn request_complete(raw: &[u8]) -> bool {
    let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    raw.len() >= end + 4 + length
}
