use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FetchError;

/// Current on-disk layout of [`WatchState`].
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Oldest keys are dropped past this many remembered items.
pub const SEEN_ITEMS_LIMIT: usize = 1024;

/// One extracted entry: field name -> normalized value.
pub type Item = BTreeMap<String, String>;

/// Stable identity of an item across signatures.
pub fn item_key(item: &Item) -> ContentHash {
    ContentHash::from_content(&serde_json::to_string(item).unwrap_or_default())
}

/// SHA-256 of a signature's canonical form, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What was extracted: a normalized text blob or a set of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignatureContent {
    Text(String),
    Items(Vec<Item>),
}

/// Canonical, noise-stripped representation of the watched content.
///
/// Items are kept sorted and deduplicated so that the page's ordering of
/// unordered entries never affects the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Version of the selection rule that produced this signature
    pub rule_version: u32,
    pub content: SignatureContent,
    pub hash: ContentHash,
}

impl Signature {
    pub fn text(rule_version: u32, text: impl Into<String>) -> Self {
        Self::from_content(rule_version, SignatureContent::Text(text.into()))
    }

    pub fn items(rule_version: u32, mut items: Vec<Item>) -> Self {
        items.sort();
        items.dedup();
        Self::from_content(rule_version, SignatureContent::Items(items))
    }

    fn from_content(rule_version: u32, content: SignatureContent) -> Self {
        let hash = ContentHash::from_content(&canonical_form(&content));
        Self {
            rule_version,
            content,
            hash,
        }
    }

    /// Whether the stored hash still matches the content.
    pub fn is_consistent(&self) -> bool {
        ContentHash::from_content(&canonical_form(&self.content)) == self.hash
    }

    pub fn items_slice(&self) -> &[Item] {
        match &self.content {
            SignatureContent::Items(items) => items,
            SignatureContent::Text(_) => &[],
        }
    }

    pub fn item_count(&self) -> usize {
        match &self.content {
            SignatureContent::Items(items) => items.len(),
            SignatureContent::Text(_) => 1,
        }
    }
}

fn canonical_form(content: &SignatureContent) -> String {
    // BTreeMap keys and sorted items make this stable
    serde_json::to_string(content).unwrap_or_default()
}

/// The persisted record for one watched target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    pub version: u32,
    /// URL of the watched target
    pub target: String,
    pub last_signature: Signature,
    pub last_checked_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    /// Failed iterations in a row just before `last_checked_at`
    pub consecutive_failures: u32,
    /// Keys of every item ever recorded, oldest first
    #[serde(default)]
    pub seen_items: Vec<ContentHash>,
}

impl WatchState {
    /// First successful iteration: the signature becomes the baseline.
    pub fn baseline(target: impl Into<String>, signature: Signature, now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            target: target.into(),
            last_signature: signature,
            last_checked_at: now,
            last_changed_at: now,
            consecutive_failures: 0,
            seen_items: Vec::new(),
        }
        .remembering()
    }

    /// Same content, newer check time.
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_checked_at: now,
            consecutive_failures: 0,
            ..self.clone()
        }
    }

    /// New content becomes the baseline.
    pub fn advanced(&self, signature: Signature, now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            target: self.target.clone(),
            last_signature: signature,
            last_checked_at: now,
            last_changed_at: now,
            consecutive_failures: 0,
            seen_items: self.seen_items.clone(),
        }
        .remembering()
    }

    /// Add the current items to `seen_items`, keeping it bounded.
    fn remembering(mut self) -> Self {
        for item in self.last_signature.items_slice() {
            let key = item_key(item);
            if !self.seen_items.contains(&key) {
                self.seen_items.push(key);
            }
        }
        let overflow = self.seen_items.len().saturating_sub(SEEN_ITEMS_LIMIT);
        self.seen_items.drain(..overflow);
        self
    }
}

/// A detected content change, handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub target: String,
    pub previous_signature: Signature,
    pub new_signature: Signature,
    pub detected_at: DateTime<Utc>,
    /// Item keys recorded before this change
    #[serde(default)]
    pub seen_before: Vec<ContentHash>,
}

impl ChangeEvent {
    /// Items present now that were not present before.
    pub fn added(&self) -> Vec<&Item> {
        let previous = self.previous_signature.items_slice();
        self.new_signature
            .items_slice()
            .iter()
            .filter(|item| previous.binary_search(*item).is_err())
            .collect()
    }

    /// Added items that were never recorded before, as opposed to
    /// entries that dropped off the page and came back.
    pub fn fresh(&self) -> Vec<&Item> {
        self.added()
            .into_iter()
            .filter(|item| !self.seen_before.contains(&item_key(item)))
            .collect()
    }

    /// Items that disappeared.
    pub fn removed(&self) -> Vec<&Item> {
        let current = self.new_signature.items_slice();
        self.previous_signature
            .items_slice()
            .iter()
            .filter(|item| current.binary_search(*item).is_err())
            .collect()
    }

    /// Stable key for sinks that need to drop redelivered events.
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}:{}",
            self.previous_signature.hash.short(),
            self.new_signature.hash.short()
        )
    }
}

/// The fetched page body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub body: String,
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
}

/// Outcome of a fetch including its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success {
        document: RawDocument,
        fetched_at: DateTime<Utc>,
        attempt_count: u32,
    },
    Failure {
        reason: FetchError,
        attempt_count: u32,
    },
}

impl FetchResult {
    pub fn attempt_count(&self) -> u32 {
        match self {
            FetchResult::Success { attempt_count, .. } => *attempt_count,
            FetchResult::Failure { attempt_count, .. } => *attempt_count,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Classification of a new signature against the stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    FirstRun,
    Unchanged,
    Changed(ChangeEvent),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::FirstRun => "first_run",
            Outcome::Unchanged => "unchanged",
            Outcome::Changed(_) => "changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, &str)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn item_order_does_not_affect_hash() {
        let a = item(&[("title", "swan lake")]);
        let b = item(&[("title", "nutcracker")]);

        let first = Signature::items(1, vec![a.clone(), b.clone()]);
        let second = Signature::items(1, vec![b, a]);

        assert_eq!(first, second);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn duplicate_items_collapse() {
        let a = item(&[("title", "swan lake")]);
        let signature = Signature::items(1, vec![a.clone(), a]);
        assert_eq!(signature.item_count(), 1);
    }

    #[test]
    fn hash_is_hex_sha256() {
        let signature = Signature::text(1, "status: open");
        assert_eq!(signature.hash.as_str().len(), 64);
        assert!(signature.hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(signature.is_consistent());
    }

    #[test]
    fn tampered_hash_is_inconsistent() {
        let mut signature = Signature::text(1, "status: open");
        signature.hash = ContentHash::from_content("something else");
        assert!(!signature.is_consistent());
    }

    #[test]
    fn change_event_diffs_items() {
        let kept = item(&[("title", "swan lake")]);
        let gone = item(&[("title", "giselle")]);
        let new = item(&[("title", "nutcracker")]);

        let event = ChangeEvent {
            target: "https://example.com".to_string(),
            previous_signature: Signature::items(1, vec![kept.clone(), gone.clone()]),
            new_signature: Signature::items(1, vec![kept, new.clone()]),
            detected_at: Utc::now(),
            seen_before: Vec::new(),
        };

        assert_eq!(event.added(), vec![&new]);
        assert_eq!(event.removed(), vec![&gone]);
        assert_eq!(event.fresh(), vec![&new]);
    }

    #[test]
    fn returning_item_is_added_but_not_fresh() {
        let swan = item(&[("title", "swan lake")]);
        let nut = item(&[("title", "nutcracker")]);
        let t0 = Utc::now();

        let both = WatchState::baseline("u", Signature::items(1, vec![swan.clone(), nut.clone()]), t0);
        let without_nut = both.advanced(Signature::items(1, vec![swan.clone()]), t0);
        assert!(without_nut.seen_items.contains(&item_key(&nut)));

        let event = ChangeEvent {
            target: "u".to_string(),
            previous_signature: without_nut.last_signature.clone(),
            new_signature: Signature::items(1, vec![swan, nut.clone()]),
            detected_at: t0,
            seen_before: without_nut.seen_items.clone(),
        };

        assert_eq!(event.added(), vec![&nut]);
        assert!(event.fresh().is_empty());
    }

    #[test]
    fn seen_items_are_bounded_oldest_first() {
        let t0 = Utc::now();
        let first = item(&[("n", "first")]);
        let mut state = WatchState::baseline("u", Signature::items(1, vec![first.clone()]), t0);
        for n in 0..SEEN_ITEMS_LIMIT {
            let n = n.to_string();
            let next = item(&[("n", n.as_str())]);
            state = state.advanced(Signature::items(1, vec![next]), t0);
        }

        assert_eq!(state.seen_items.len(), SEEN_ITEMS_LIMIT);
        assert!(!state.seen_items.contains(&item_key(&first)));
    }

    #[test]
    fn state_without_seen_items_still_loads() {
        let state = WatchState::baseline("u", Signature::text(1, "a"), Utc::now());
        let mut json = serde_json::to_value(&state).unwrap();
        json.as_object_mut().unwrap().remove("seen_items");

        let back: WatchState = serde_json::from_value(json).unwrap();
        assert!(back.seen_items.is_empty());
    }

    #[test]
    fn state_survives_json_round_trip() {
        let now = Utc::now();
        let state = WatchState::baseline(
            "https://example.com",
            Signature::items(2, vec![item(&[("date", "01.02.2025"), ("title", "x")])]),
            now,
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: WatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn touched_only_moves_check_time() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(15);
        let state = WatchState::baseline("u", Signature::text(1, "a"), t0);
        let touched = state.touched(t1);

        assert_eq!(touched.last_signature, state.last_signature);
        assert_eq!(touched.last_changed_at, t0);
        assert_eq!(touched.last_checked_at, t1);
    }
}
