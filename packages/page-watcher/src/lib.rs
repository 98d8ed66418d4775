//! Watches one web page and reports meaningful changes.
//!
//! Each iteration runs fetch → extract → compare → notify → persist. The
//! stored state only advances after a successful iteration, so a failure
//! at any stage leaves the last good baseline in place.

pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod notifier;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;

// Re-exports for clean API
pub use clock::SystemClock;
pub use config::{Config, NotifySink};
pub use error::{ErrorKind, FetchError, NotifyError, ParseError, StorageError, WatchError};
pub use extractor::{Extractor, FieldRule, SelectionRule};
pub use fetcher::{HttpFetcher, ReqwestTransport, RetryPolicy, Target};
pub use scheduler::{DeliveryPolicy, IterationReport, Phase, Watcher, WatcherConfig};
pub use storage::{JsonFileStore, MemoryStore};
pub use traits::{Clock, HttpResponse, HttpTransport, Notifier, PageFetcher, StateStore};
pub use types::{ChangeEvent, ContentHash, FetchResult, Outcome, Signature, SignatureContent, WatchState};
