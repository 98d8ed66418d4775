//! End-to-end behaviour of the watch loop over test doubles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use watcher_core::storage::MemoryStore;
use watcher_core::testing::{FlakyStore, ManualClock, RecordingNotifier, ScriptedFetcher};
use watcher_core::{
    DeliveryPolicy, ErrorKind, FetchError, Outcome, SignatureContent, WatcherConfig,
};

use common::{maintenance_page, status_page, status_watcher};

#[tokio::test]
async fn first_run_then_unchanged_then_changed() {
    let fetcher = ScriptedFetcher::new()
        .then_page(&status_page("open"))
        .then_page(&status_page("open"))
        .then_page(&status_page("closed"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        store.clone(),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    let first = watcher.run_once().await.unwrap();
    assert_eq!(first.outcome, Outcome::FirstRun);
    assert!(notifier.delivered().is_empty());
    let baseline = store.snapshot().unwrap();
    assert_eq!(
        baseline.last_signature.content,
        SignatureContent::Text("status: open".to_string())
    );

    let second = watcher.run_once().await.unwrap();
    assert_eq!(second.outcome, Outcome::Unchanged);
    assert!(notifier.delivered().is_empty());
    let touched = store.snapshot().unwrap();
    assert_eq!(touched.last_signature, baseline.last_signature);
    assert_eq!(touched.last_changed_at, baseline.last_changed_at);

    let third = watcher.run_once().await.unwrap();
    assert!(third.notified);
    let delivered = notifier.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].previous_signature, baseline.last_signature);
    assert_eq!(
        delivered[0].new_signature.content,
        SignatureContent::Text("status: closed".to_string())
    );
    assert_eq!(delivered[0].target, common::URL);
    assert_eq!(store.snapshot().unwrap().last_signature.hash, third.hash);
    assert_eq!(store.saves(), 3);
}

#[tokio::test]
async fn unchanged_content_never_notifies() {
    let fetcher = ScriptedFetcher::serving(&status_page("open"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let mut watcher = status_watcher(&fetcher, store, &notifier, &clock, WatcherConfig::default());

    for _ in 0..5 {
        watcher.run_once().await.unwrap();
    }

    assert_eq!(notifier.attempts(), 0);
}

#[tokio::test]
async fn parse_failure_leaves_state_untouched() {
    let fetcher = ScriptedFetcher::new()
        .then_page(&status_page("open"))
        .then_page(&maintenance_page())
        .then_page(&status_page("closed"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        store.clone(),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    watcher.run_once().await.unwrap();
    let before = store.snapshot().unwrap();

    let err = watcher.run_once().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(store.snapshot().unwrap(), before);
    assert_eq!(watcher.consecutive_failures(), 1);

    let report = watcher.run_once().await.unwrap();
    match report.outcome {
        Outcome::Changed(event) => {
            assert_eq!(event.previous_signature, before.last_signature);
        }
        other => panic!("expected change against last valid state, got {other:?}"),
    }
    assert_eq!(notifier.delivered().len(), 1);
}

#[tokio::test]
async fn fetch_failures_are_counted_then_recorded_with_next_success() {
    let fetcher = ScriptedFetcher::new()
        .then_page(&status_page("open"))
        .then_failure(FetchError::Server { status: 503 }, 3)
        .then_failure(FetchError::Timeout { after: Duration::from_secs(20) }, 3)
        .then_page(&status_page("open"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        store.clone(),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    watcher.run_once().await.unwrap();

    let err = watcher.run_once().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    let err = watcher.run_once().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(watcher.consecutive_failures(), 2);
    assert_eq!(store.saves(), 1);

    let report = watcher.run_once().await.unwrap();
    assert_eq!(report.outcome, Outcome::Unchanged);
    assert_eq!(watcher.consecutive_failures(), 0);
    assert_eq!(store.snapshot().unwrap().consecutive_failures, 2);
}

#[tokio::test]
async fn client_errors_are_reported_as_client_kind() {
    let fetcher = ScriptedFetcher::new().then_failure(FetchError::Client { status: 404 }, 1);
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        store.clone(),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    let err = watcher.run_once().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Client);
    assert!(store.snapshot().is_none());
}

#[tokio::test]
async fn at_least_once_keeps_baseline_until_delivery_succeeds() {
    let fetcher = ScriptedFetcher::new()
        .then_page(&status_page("open"))
        .then_page(&status_page("closed"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new().failing(1);
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        store.clone(),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    watcher.run_once().await.unwrap();
    let baseline = store.snapshot().unwrap();

    let err = watcher.run_once().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Notify);
    assert_eq!(store.snapshot().unwrap(), baseline);

    // Same change is detected again and delivered this time
    let report = watcher.run_once().await.unwrap();
    assert!(report.notified);
    assert_eq!(notifier.attempts(), 2);
    assert_eq!(notifier.delivered().len(), 1);
    assert_ne!(store.snapshot().unwrap().last_signature, baseline.last_signature);

    let report = watcher.run_once().await.unwrap();
    assert_eq!(report.outcome, Outcome::Unchanged);
    assert_eq!(notifier.attempts(), 2);
}

#[tokio::test]
async fn at_most_once_advances_despite_delivery_failure() {
    let fetcher = ScriptedFetcher::new()
        .then_page(&status_page("open"))
        .then_page(&status_page("closed"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new().failing(1);
    let clock = ManualClock::default();
    let config = WatcherConfig {
        delivery: DeliveryPolicy::AtMostOnce,
        ..WatcherConfig::default()
    };
    let mut watcher = status_watcher(&fetcher, store.clone(), &notifier, &clock, config);

    watcher.run_once().await.unwrap();
    let baseline = store.snapshot().unwrap();

    let report = watcher.run_once().await.unwrap();
    assert!(!report.notified);
    assert!(matches!(report.outcome, Outcome::Changed(_)));
    assert_ne!(store.snapshot().unwrap().last_signature, baseline.last_signature);

    let report = watcher.run_once().await.unwrap();
    assert_eq!(report.outcome, Outcome::Unchanged);
    assert_eq!(notifier.attempts(), 1);
    assert!(notifier.delivered().is_empty());
}

#[tokio::test]
async fn redelivered_change_keeps_its_dedupe_key() {
    let fetcher = ScriptedFetcher::new()
        .then_page(&status_page("open"))
        .then_page(&status_page("closed"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new().failing(1);
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        store.clone(),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    watcher.run_once().await.unwrap();
    let failed = watcher.run_once().await.unwrap_err();
    assert_eq!(failed.kind(), ErrorKind::Notify);

    let report = watcher.run_once().await.unwrap();
    let Outcome::Changed(event) = report.outcome else {
        panic!("expected a change");
    };
    assert_eq!(notifier.delivered()[0].dedupe_key(), event.dedupe_key());
}

#[tokio::test]
async fn failed_save_does_not_lose_the_first_run() {
    let fetcher = ScriptedFetcher::serving(&status_page("open"));
    let store = FlakyStore::new().failing_saves(1);
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let mut watcher = status_watcher(
        &fetcher,
        Arc::new(store.clone()),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    let err = watcher.run_once().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(store.snapshot().is_none());

    let report = watcher.run_once().await.unwrap();
    assert_eq!(report.outcome, Outcome::FirstRun);
    assert!(store.snapshot().is_some());
    assert_eq!(notifier.attempts(), 0);
}

#[tokio::test]
async fn run_stops_when_cancelled() {
    let shutdown = CancellationToken::new();
    let fetcher = ScriptedFetcher::serving(&status_page("open"));
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default().cancel_after(3, shutdown.clone());
    let config = WatcherConfig {
        interval: Duration::from_secs(60),
        ..WatcherConfig::default()
    };
    let watcher = status_watcher(&fetcher, store.clone(), &notifier, &clock, config);

    watcher.run(shutdown).await;

    assert_eq!(fetcher.calls(), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 3]);
    assert_eq!(store.saves(), 3);
}

#[tokio::test]
async fn run_does_nothing_when_already_cancelled() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let fetcher = ScriptedFetcher::serving(&status_page("open"));
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default();
    let watcher = status_watcher(
        &fetcher,
        Arc::new(MemoryStore::new()),
        &notifier,
        &clock,
        WatcherConfig::default(),
    );

    watcher.run(shutdown).await;

    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn loop_survives_failures_and_widens_interval() {
    let shutdown = CancellationToken::new();
    let fetcher = ScriptedFetcher::new().then_failure(FetchError::Network("refused".into()), 3);
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::default().cancel_after(4, shutdown.clone());
    let config = WatcherConfig {
        interval: Duration::from_secs(60),
        failure_threshold: 2,
        max_interval: Duration::from_secs(200),
        delivery: DeliveryPolicy::AtLeastOnce,
    };
    let watcher = status_watcher(&fetcher, store.clone(), &notifier, &clock, config);

    watcher.run(shutdown).await;

    assert_eq!(fetcher.calls(), 4);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(200),
            Duration::from_secs(200),
        ]
    );
    assert!(store.snapshot().is_none());
}
