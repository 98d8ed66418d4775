//! Typed errors for the watcher.
//!
//! Uses `thiserror` for library errors (not `anyhow`); the binary wraps
//! them with context.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by a single fetch attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection refused, DNS failure, reset, body read failure
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the target timeout
    #[error("timeout after {after:?}")]
    Timeout { after: Duration },

    /// 5xx response
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// 408 / 429 response
    #[error("throttled: HTTP {status}")]
    Throttled {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// Any other 4xx response
    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    /// Target could not be turned into a request
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Timeout { .. }
                | FetchError::Server { .. }
                | FetchError::Throttled { .. }
        )
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            408 | 429 => FetchError::Throttled {
                status,
                retry_after,
            },
            500..=599 => FetchError::Server { status },
            _ => FetchError::Client { status },
        }
    }
}

/// Errors raised while reducing a document to a signature.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The structural landmark is absent; the page layout probably changed
    #[error("landmark not found: {selector}")]
    LandmarkMissing { selector: String },

    /// The landmark exists but no item satisfied the rule
    #[error("no items matched {selector} inside the landmark")]
    EmptySelection { selector: String },

    #[error("invalid CSS selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but does not hold a valid state record
    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Parsed, but the signature hash does not match its content
    #[error("state file {path} fails its hash check")]
    HashMismatch { path: PathBuf },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The stored record belongs to a different target
    #[error("state belongs to {found}, expected {expected}")]
    TargetMismatch { expected: String, found: String },

    #[error("unsupported state format version {0}")]
    UnsupportedVersion(u32),
}

/// Errors from notification sinks.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notifier misconfigured: {0}")]
    Config(String),
}

/// Operator-facing classification of an iteration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Client,
    Parse,
    Storage,
    Notify,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Client => "client",
            ErrorKind::Parse => "parse",
            ErrorKind::Storage => "storage",
            ErrorKind::Notify => "notify",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a watch iteration was abandoned.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        #[source]
        source: FetchError,
        attempts: u32,
    },

    #[error("extraction failed: {0}")]
    Parse(#[from] ParseError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

impl WatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatchError::Fetch { source, .. } => match source {
                FetchError::Client { .. } | FetchError::InvalidTarget(_) => ErrorKind::Client,
                _ => ErrorKind::Network,
            },
            WatchError::Parse(_) => ErrorKind::Parse,
            WatchError::Storage(_) => ErrorKind::Storage,
            WatchError::Notify(_) => ErrorKind::Notify,
        }
    }
}

/// Result type alias for extraction.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for notification delivery.
pub type NotifyResult<T> = std::result::Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            FetchError::from_status(429, None),
            FetchError::Throttled { status: 429, .. }
        ));
        assert!(matches!(
            FetchError::from_status(404, None),
            FetchError::Client { status: 404 }
        ));
        assert!(matches!(
            FetchError::from_status(503, None),
            FetchError::Server { status: 503 }
        ));
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Server { status: 502 }.is_retryable());
        assert!(FetchError::from_status(408, None).is_retryable());
        assert!(!FetchError::Client { status: 403 }.is_retryable());
        assert!(!FetchError::InvalidTarget("x".into()).is_retryable());
    }

    #[test]
    fn client_fetch_errors_are_surfaced_as_client_kind() {
        let err = WatchError::Fetch {
            source: FetchError::Client { status: 404 },
            attempts: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Client);

        let err = WatchError::Fetch {
            source: FetchError::Timeout {
                after: Duration::from_secs(20),
            },
            attempts: 3,
        };
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
