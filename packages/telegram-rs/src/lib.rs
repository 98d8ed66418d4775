// https://core.telegram.org/bots/api#sendmessage

pub mod models;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::models::{ApiResponse, Message, SendMessageRequest};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("request to Telegram failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Telegram returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Telegram rejected the message: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct TelegramOptions {
    pub bot_token: String,
    pub chat_id: i64,
    /// Overridable for local bot API servers.
    pub api_base: String,
    /// Whole-request timeout, connect through body.
    pub timeout: Duration,
}

impl TelegramOptions {
    pub fn new(bot_token: impl Into<String>, chat_id: i64) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TelegramService {
    options: TelegramOptions,
    client: Client,
}

impl TelegramService {
    pub fn new(options: TelegramOptions) -> Result<Self, TelegramError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { options, client })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn chat_id(&self) -> i64 {
        self.options.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{base}/bot{token}/{method}",
            base = self.options.api_base.trim_end_matches('/'),
            token = self.options.bot_token,
        )
    }

    /// Send an HTML-formatted message to the configured chat.
    pub async fn send_html(&self, text: &str) -> Result<Message, TelegramError> {
        let body = SendMessageRequest {
            chat_id: self.options.chat_id,
            text,
            parse_mode: Some("HTML"),
            disable_web_page_preview: true,
        };
        self.send_message(&body).await
    }

    pub async fn send_message(
        &self,
        request: &SendMessageRequest<'_>,
    ) -> Result<Message, TelegramError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data = response.json::<ApiResponse<Message>>().await?;
        match (data.ok, data.result) {
            (true, Some(message)) => Ok(message),
            _ => Err(TelegramError::Rejected(
                data.description
                    .unwrap_or_else(|| "no description".to_string()),
            )),
        }
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
