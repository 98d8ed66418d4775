use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use url::Url;

use crate::extractor::SelectionRule;
use crate::fetcher::{RetryPolicy, Target, DEFAULT_USER_AGENT};
use crate::scheduler::{DeliveryPolicy, WatcherConfig};

/// Where change notifications go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifySink {
    Log,
    Webhook { url: Url },
    Telegram { bot_token: String, chat_id: i64 },
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    pub state_file: PathBuf,
    pub rule_file: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub watcher: WatcherConfig,
    pub notify: NotifySink,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("WATCH_URL").context("WATCH_URL must be set")?;
        let url = Url::parse(&url).context("WATCH_URL must be a valid URL")?;

        let headers = match lookup("WATCH_HEADERS") {
            Some(raw) => parse_headers(&raw)?,
            None => default_headers(),
        };

        let mut target = Target::new(url)
            .with_timeout(Duration::from_secs(parse_or(&lookup, "WATCH_TIMEOUT_SECS", 20)?));
        target.headers = headers;

        let retry = RetryPolicy::new(parse_or(&lookup, "FETCH_MAX_ATTEMPTS", 3)?).with_backoff(
            Duration::from_millis(parse_or(&lookup, "FETCH_INITIAL_BACKOFF_MS", 1_000)?),
            Duration::from_millis(parse_or(&lookup, "FETCH_MAX_BACKOFF_MS", 30_000)?),
        );
        if retry.max_attempts == 0 {
            bail!("FETCH_MAX_ATTEMPTS must be at least 1");
        }

        let delivery = match lookup("DELIVERY_POLICY").as_deref() {
            None | Some("at-least-once") => DeliveryPolicy::AtLeastOnce,
            Some("at-most-once") => DeliveryPolicy::AtMostOnce,
            Some(other) => bail!("DELIVERY_POLICY must be at-least-once or at-most-once, got {other}"),
        };

        let watcher = WatcherConfig {
            interval: Duration::from_secs(parse_or(&lookup, "WATCH_INTERVAL_SECS", 900)?),
            failure_threshold: parse_or(&lookup, "WATCH_FAILURE_THRESHOLD", 5)?,
            max_interval: Duration::from_secs(parse_or(&lookup, "WATCH_MAX_INTERVAL_SECS", 3_600)?),
            delivery,
        };
        if watcher.interval.is_zero() {
            bail!("WATCH_INTERVAL_SECS must be greater than 0");
        }

        let notify = match lookup("NOTIFY_SINK").as_deref() {
            None | Some("log") => NotifySink::Log,
            Some("webhook") => {
                let url = lookup("WEBHOOK_URL").context("WEBHOOK_URL must be set for the webhook sink")?;
                NotifySink::Webhook {
                    url: Url::parse(&url).context("WEBHOOK_URL must be a valid URL")?,
                }
            }
            Some("telegram") => NotifySink::Telegram {
                bot_token: lookup("TELEGRAM_BOT_TOKEN")
                    .context("TELEGRAM_BOT_TOKEN must be set for the telegram sink")?,
                chat_id: lookup("TELEGRAM_CHAT_ID")
                    .context("TELEGRAM_CHAT_ID must be set for the telegram sink")?
                    .trim()
                    .parse()
                    .context("TELEGRAM_CHAT_ID must be an integer")?,
            },
            Some(other) => bail!("NOTIFY_SINK must be log, webhook or telegram, got {other}"),
        };

        Ok(Self {
            target,
            state_file: lookup("WATCH_STATE_FILE")
                .unwrap_or_else(|| "data/watch_state.json".to_string())
                .into(),
            rule_file: lookup("WATCH_RULE_FILE").map(PathBuf::from),
            retry,
            watcher,
            notify,
        })
    }

    /// The configured selection rule, or whole-body text.
    pub fn selection_rule(&self) -> Result<SelectionRule> {
        match &self.rule_file {
            Some(path) => SelectionRule::from_file(path)
                .with_context(|| format!("Failed to load rule file {}", path.display())),
            None => Ok(SelectionRule::whole_body()),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}

fn default_headers() -> Vec<(String, String)> {
    vec![
        ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        ("Accept-Language".to_string(), "ru,en;q=0.9".to_string()),
    ]
}

/// `Name: value` pairs separated by newlines or `|`.
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(['\n', '|'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .with_context(|| format!("Header {line:?} must look like `Name: value`"))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("Header {line:?} has an empty name");
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
