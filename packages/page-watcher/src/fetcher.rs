//! Network access for the watched page.
//!
//! `HttpFetcher` owns the retry policy; the actual request goes through an
//! [`HttpTransport`] so that retries and backoff can be exercised without a
//! network. `ReqwestTransport` is the production transport.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::traits::{Clock, HttpResponse, HttpTransport, PageFetcher};
use crate::types::{FetchResult, RawDocument};

/// Browser-like User-Agent; some sites serve bots a different page
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:129.0) Gecko/20100101 Firefox/129.0";

/// What to fetch and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: Url,
    /// Extra request headers, sent in order
    pub headers: Vec<(String, String)>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Target {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Delay after a failed attempt, honouring `Retry-After` when given.
    pub fn delay_after(&self, attempt: u32, error: &FetchError) -> Duration {
        match error {
            FetchError::Throttled {
                retry_after: Some(wait),
                ..
            } => (*wait).min(self.max_backoff),
            _ => self.backoff_for(attempt),
        }
    }
}

/// Fetcher that retries transient failures over an [`HttpTransport`].
pub struct HttpFetcher<T: HttpTransport> {
    transport: T,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<T: HttpTransport> HttpFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T: HttpTransport> PageFetcher for HttpFetcher<T> {
    async fn fetch(&self, target: &Target) -> FetchResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %target.url, attempt, max_attempts, "HTTP fetch starting");

            let error = match self.transport.get(target).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    info!(
                        url = %target.url,
                        status = response.status,
                        attempt,
                        bytes = response.body.len(),
                        "Page fetched"
                    );
                    return FetchResult::Success {
                        document: RawDocument {
                            body: response.body,
                            final_url: response.final_url,
                            status: response.status,
                        },
                        fetched_at: self.clock.now(),
                        attempt_count: attempt,
                    };
                }
                Ok(response) => FetchError::from_status(response.status, response.retry_after),
                Err(error) => error,
            };

            if !error.is_retryable() {
                warn!(url = %target.url, attempt, error = %error, "Fetch failed, not retryable");
                return FetchResult::Failure {
                    reason: error,
                    attempt_count: attempt,
                };
            }

            if attempt >= max_attempts {
                warn!(url = %target.url, attempt, error = %error, "Fetch attempts exhausted");
                return FetchResult::Failure {
                    reason: error,
                    attempt_count: attempt,
                };
            }

            let delay = self.policy.delay_after(attempt, &error);
            warn!(
                url = %target.url,
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Fetch failed, retrying"
            );
            self.clock.sleep(delay).await;
        }
    }
}

/// Production transport using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    /// Set a custom HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, target: &Target) -> Result<HttpResponse, FetchError> {
        let mut request = self
            .client
            .get(target.url.clone())
            .timeout(target.timeout);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, target.timeout))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(e, target.timeout))?;
        let body = decode_body(&bytes, content_type.as_deref());

        Ok(HttpResponse {
            status,
            final_url,
            body,
            retry_after,
        })
    }
}

// =============================================================================
// Body decoding
// =============================================================================

/// How far into the document a `<meta>` charset declaration is looked for
const META_SNIFF_BYTES: usize = 1024;

static RE_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*["']?\s*([A-Za-z0-9_.:\-]+)"#).unwrap()
});
static RE_META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([A-Za-z0-9_.:\-]+)"#).unwrap()
});

/// Decode a page body. The encoding comes from a byte order mark, then the
/// `Content-Type` charset, then a `<meta>` declaration near the top of the
/// document, and falls back to UTF-8.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| content_type.and_then(|ct| charset_in(&RE_CHARSET, ct)))
        .or_else(|| {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(META_SNIFF_BYTES)]);
            charset_in(&RE_META_CHARSET, &head)
        })
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "Page body contains malformed sequences");
    }
    text.into_owned()
}

fn charset_in(pattern: &Regex, haystack: &str) -> Option<&'static Encoding> {
    let label = pattern.captures(haystack)?.get(1)?.as_str();
    Encoding::for_label(label.as_bytes())
}

fn classify_reqwest_error(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout { after: timeout }
    } else if error.is_builder() {
        FetchError::InvalidTarget(error.to_string())
    } else {
        FetchError::Network(error.to_string())
    }
}
