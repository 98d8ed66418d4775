use async_trait::async_trait;
use ::telegram::{escape_html, TelegramError, TelegramOptions, TelegramService};

use crate::error::{NotifyError, NotifyResult};
use crate::traits::Notifier;
use crate::types::{ChangeEvent, Item, SignatureContent};

/// Sends one Telegram message per new entry, or a single summary when the
/// change has no new entries.
pub struct TelegramNotifier {
    service: TelegramService,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: i64) -> NotifyResult<Self> {
        let service = TelegramService::new(TelegramOptions::new(bot_token, chat_id))
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self::with_service(service))
    }

    pub fn with_service(service: TelegramService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        let messages = render_messages(event);
        if messages.is_empty() {
            tracing::debug!(dedupe_key = %event.dedupe_key(), "Only returning entries, nothing to send");
            return Ok(());
        }
        for message in messages {
            self.service
                .send_html(&message)
                .await
                .map_err(into_notify_error)?;
        }
        tracing::debug!(chat_id = self.service.chat_id(), "Telegram notification sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// An API refusal is a rejection; anything else never reached the API.
fn into_notify_error(error: TelegramError) -> NotifyError {
    match error {
        TelegramError::Api { status, body } => NotifyError::Rejected { status, body },
        TelegramError::Rejected(description) => NotifyError::Rejected {
            status: 200,
            body: description,
        },
        TelegramError::Request(e) => NotifyError::Transport(Box::new(e)),
    }
}

/// HTML messages for a change, one per never-seen entry. Entries that
/// only came back after dropping off the page are not announced again.
pub fn render_messages(event: &ChangeEvent) -> Vec<String> {
    let fresh = event.fresh();
    if !fresh.is_empty() {
        return fresh
            .into_iter()
            .map(|item| format!("<b>New entry on the page!</b>\n{}", render_item(item)))
            .collect();
    }

    let removed = event.removed().len();
    let summary = match &event.new_signature.content {
        SignatureContent::Items(_) if removed > 0 => {
            let noun = if removed == 1 { "entry" } else { "entries" };
            format!("<b>{removed} {noun} removed from the page</b>")
        }
        SignatureContent::Items(_) if !event.added().is_empty() => return Vec::new(),
        _ => "<b>Page content changed</b>".to_string(),
    };
    vec![format!("{summary}\n{}", escape_html(&event.target))]
}

/// Date and time first, URL last, everything else in between.
fn render_item(item: &Item) -> String {
    let mut lines = Vec::new();

    let when = ["date", "time"]
        .iter()
        .filter_map(|key| item.get(*key))
        .map(|v| escape_html(v))
        .collect::<Vec<_>>()
        .join(" ");
    if !when.is_empty() {
        lines.push(when);
    }

    for (key, value) in item {
        if matches!(key.as_str(), "date" | "time" | "url") {
            continue;
        }
        if key == "title" || key == "text" {
            lines.push(escape_html(value));
        } else {
            lines.push(format!("{}: {}", escape_html(key), escape_html(value)));
        }
    }

    if let Some(url) = item.get("url") {
        lines.push(escape_html(url));
    }

    lines.join("\n")
}
