//! The watch loop.
//!
//! ```text
//! Idle ─► Fetching ─► Extracting ─► Comparing ─┬─────────────► Persisting ─► Idle
//!                                               └─► Notifying ─┘
//! ```
//!
//! Each iteration either commits a new state or leaves the stored state
//! untouched. Failures are logged and counted, and the loop carries on
//! with the next scheduled check.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detector;
use crate::error::WatchError;
use crate::extractor::Extractor;
use crate::fetcher::Target;
use crate::traits::{Clock, Notifier, PageFetcher, StateStore};
use crate::types::{ContentHash, FetchResult, Outcome, WatchState};

/// What happens to the baseline when the notifier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Keep the old baseline so the change is re-detected and re-sent
    AtLeastOnce,
    /// Advance anyway; the failed notification is only logged
    AtMostOnce,
}

/// Configuration for the watch loop.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between iterations
    pub interval: Duration,
    /// Consecutive failures before the interval starts widening (0 = never)
    pub failure_threshold: u32,
    /// Upper bound for the widened interval
    pub max_interval: Duration,
    pub delivery: DeliveryPolicy,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900),
            failure_threshold: 5,
            max_interval: Duration::from_secs(3_600),
            delivery: DeliveryPolicy::AtLeastOnce,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Extracting,
    Comparing,
    Notifying,
    Persisting,
}

/// Summary of a successful iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub outcome: Outcome,
    /// Hash now stored as the baseline
    pub hash: ContentHash,
    pub attempts: u32,
    /// Whether a notification was delivered
    pub notified: bool,
}

pub struct Watcher {
    target: Target,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Extractor,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: WatcherConfig,
    phase: Phase,
    consecutive_failures: u32,
}

impl Watcher {
    pub fn new(
        target: Target,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Extractor,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            target,
            fetcher,
            extractor,
            store,
            notifier,
            clock,
            config: WatcherConfig::default(),
            phase: Phase::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Failed iterations since the last successful one
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next iteration, widened while the target keeps failing.
    pub fn next_delay(&self) -> Duration {
        let threshold = self.config.failure_threshold;
        if threshold == 0 || self.consecutive_failures < threshold {
            return self.config.interval;
        }
        let doublings = (self.consecutive_failures - threshold + 1).min(16);
        let ceiling = self.config.max_interval.max(self.config.interval);
        self.config
            .interval
            .saturating_mul(1u32 << doublings)
            .min(ceiling)
    }

    /// Loop until `shutdown` is cancelled. The token is checked between
    /// iterations and while sleeping, never mid-fetch.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            url = %self.target.url,
            interval_secs = self.config.interval.as_secs(),
            notifier = self.notifier.name(),
            "Watcher started"
        );

        while !shutdown.is_cancelled() {
            // Failures are logged and counted inside run_once
            let _ = self.run_once().await;

            let delay = self.next_delay();
            debug!(delay_secs = delay.as_secs(), "Sleeping until next check");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.clock.sleep(delay) => {}
            }
        }

        info!(url = %self.target.url, "Watcher stopped");
    }

    /// Run one isolated iteration and update the failure counter.
    pub async fn run_once(&mut self) -> Result<IterationReport, WatchError> {
        let result = self.iterate().await;
        self.set_phase(Phase::Idle);

        match &result {
            Ok(report) => {
                self.consecutive_failures = 0;
                info!(
                    url = %self.target.url,
                    outcome = report.outcome.label(),
                    hash = %report.hash.short(),
                    attempts = report.attempts,
                    notified = report.notified,
                    "Check complete"
                );
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                error!(
                    url = %self.target.url,
                    error_kind = %e.kind(),
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    "Check failed"
                );
            }
        }

        result
    }

    async fn iterate(&mut self) -> Result<IterationReport, WatchError> {
        self.set_phase(Phase::Fetching);
        let (document, attempts) = match self.fetcher.fetch(&self.target).await {
            FetchResult::Success {
                document,
                attempt_count,
                ..
            } => (document, attempt_count),
            FetchResult::Failure {
                reason,
                attempt_count,
            } => {
                return Err(WatchError::Fetch {
                    source: reason,
                    attempts: attempt_count,
                })
            }
        };

        self.set_phase(Phase::Extracting);
        let signature = self.extractor.extract(&document.body)?;

        self.set_phase(Phase::Comparing);
        let previous = self.store.load().await?;
        let now = self.clock.now();
        let outcome = detector::compare(&signature, previous.as_ref(), now);

        let mut notified = false;
        let mut next_state = match (&outcome, previous) {
            (Outcome::Changed(event), Some(previous)) => {
                self.set_phase(Phase::Notifying);
                match self.notifier.notify(event).await {
                    Ok(()) => notified = true,
                    Err(e) if self.config.delivery == DeliveryPolicy::AtMostOnce => {
                        warn!(
                            notifier = self.notifier.name(),
                            error = %e,
                            dedupe_key = %event.dedupe_key(),
                            "Notification failed, advancing baseline anyway"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
                previous.advanced(signature, now)
            }
            (Outcome::Unchanged, Some(previous)) => previous.touched(now),
            _ => WatchState::baseline(self.target.url.as_str(), signature, now),
        };
        // Failures that preceded this success are recorded with it
        next_state.consecutive_failures = self.consecutive_failures;

        self.set_phase(Phase::Persisting);
        self.store.save(&next_state).await?;

        Ok(IterationReport {
            outcome,
            hash: next_state.last_signature.hash,
            attempts,
            notified,
        })
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Phase transition");
            self.phase = phase;
        }
    }
}
