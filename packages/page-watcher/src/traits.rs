// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE seams only. The watch logic (compare, sequence,
// persist) lives in detector.rs and scheduler.rs and is written against
// these traits so tests never touch the network, disk or wall clock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FetchError, NotifyResult, StorageResult};
use crate::fetcher::Target;
use crate::types::{ChangeEvent, FetchResult, WatchState};

// =============================================================================
// HTTP Transport (single request, no retries)
// =============================================================================

/// A single HTTP response as seen by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
    /// Parsed `Retry-After` header, seconds form only
    pub retry_after: Option<Duration>,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one GET. Non-success statuses are returned as responses,
    /// only transport-level faults are errors.
    async fn get(&self, target: &Target) -> Result<HttpResponse, FetchError>;
}

// =============================================================================
// Page Fetcher (retries + backoff)
// =============================================================================

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Never fails past its boundary: exhaustion is a `FetchResult::Failure`.
    async fn fetch(&self, target: &Target) -> FetchResult;
}

// =============================================================================
// State Store
// =============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when no state has been recorded yet.
    async fn load(&self) -> StorageResult<Option<WatchState>>;

    /// Replace the stored state. Must be atomic with respect to crashes.
    async fn save(&self, state: &WatchState) -> StorageResult<()>;
}

// =============================================================================
// Notifier
// =============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> NotifyResult<()>;

    /// Short sink name for logs
    fn name(&self) -> &str;
}

// =============================================================================
// Clock
// =============================================================================

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}
