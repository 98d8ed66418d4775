// Common test utilities

use std::sync::Arc;

use url::Url;
use watcher_core::testing::{ManualClock, RecordingNotifier, ScriptedFetcher};
use watcher_core::{Extractor, SelectionRule, StateStore, Target, Watcher, WatcherConfig};

pub const URL: &str = "https://example.com/status";

pub fn target() -> Target {
    Target::new(Url::parse(URL).unwrap())
}

/// A page whose only meaningful content is the `#status` element.
pub fn status_page(status: &str) -> String {
    format!(
        r#"<html><body>
             <header>Rendered at {status}-irrelevant</header>
             <div id="status">Status: {status}</div>
           </body></html>"#
    )
}

/// A page without the `#status` landmark, e.g. a maintenance screen.
pub fn maintenance_page() -> String {
    "<html><body><h1>Down for maintenance</h1></body></html>".to_string()
}

/// Watcher over the `#status` element with test doubles everywhere else.
pub fn status_watcher(
    fetcher: &ScriptedFetcher,
    store: Arc<dyn StateStore>,
    notifier: &RecordingNotifier,
    clock: &ManualClock,
    config: WatcherConfig,
) -> Watcher {
    Watcher::new(
        target(),
        Arc::new(fetcher.clone()),
        Extractor::new(SelectionRule::text_of("#status")).unwrap(),
        store,
        Arc::new(notifier.clone()),
        Arc::new(clock.clone()),
    )
    .with_config(config)
}
