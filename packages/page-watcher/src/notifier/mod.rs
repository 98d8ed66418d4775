//! Notification sinks.
//!
//! Every sink implements [`Notifier`]; the watcher never knows which
//! transport is behind it.

pub mod log;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NotifySink;
use crate::error::NotifyResult;
use crate::traits::Notifier;
use crate::types::{ChangeEvent, Item};

pub use self::log::LogNotifier;
pub use self::telegram::TelegramNotifier;
pub use self::webhook::WebhookNotifier;

/// Wire payload shared by the log and webhook sinks.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeNotification<'a> {
    pub target: &'a str,
    pub detected_at: DateTime<Utc>,
    pub previous_hash: &'a str,
    pub new_hash: &'a str,
    pub dedupe_key: String,
    pub added: Vec<&'a Item>,
    /// Added items never seen on the page before
    pub fresh: Vec<&'a Item>,
    pub removed: Vec<&'a Item>,
}

impl<'a> ChangeNotification<'a> {
    pub fn from_event(event: &'a ChangeEvent) -> Self {
        Self {
            target: &event.target,
            detected_at: event.detected_at,
            previous_hash: event.previous_signature.hash.as_str(),
            new_hash: event.new_signature.hash.as_str(),
            dedupe_key: event.dedupe_key(),
            added: event.added(),
            fresh: event.fresh(),
            removed: event.removed(),
        }
    }
}

/// Build the configured sink.
pub fn build(sink: &NotifySink) -> NotifyResult<Arc<dyn Notifier>> {
    Ok(match sink {
        NotifySink::Log => Arc::new(LogNotifier),
        NotifySink::Webhook { url } => Arc::new(WebhookNotifier::new(url.clone())?),
        NotifySink::Telegram { bot_token, chat_id } => {
            Arc::new(TelegramNotifier::new(bot_token.clone(), *chat_id)?)
        }
    })
}
