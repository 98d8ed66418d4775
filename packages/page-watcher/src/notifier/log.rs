use async_trait::async_trait;

use super::ChangeNotification;
use crate::error::{NotifyError, NotifyResult};
use crate::traits::Notifier;
use crate::types::ChangeEvent;

/// Emits each change as one structured log record; the process manager
/// routes it like any other log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        let notification = ChangeNotification::from_event(event);
        let payload = serde_json::to_string(&notification)
            .map_err(|e| NotifyError::Transport(Box::new(e)))?;

        tracing::info!(
            target: "page_watcher::change",
            url = %event.target,
            added = notification.added.len(),
            removed = notification.removed.len(),
            dedupe_key = %notification.dedupe_key,
            payload = %payload,
            "Change detected"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
