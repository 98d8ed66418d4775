use chrono::{DateTime, Utc};

use crate::types::{ChangeEvent, Outcome, Signature, WatchState};

/// Classify a freshly extracted signature against the stored state.
///
/// A state written by a different rule version is not a comparable
/// baseline and is treated like a first run.
pub fn compare(
    new_signature: &Signature,
    previous: Option<&WatchState>,
    detected_at: DateTime<Utc>,
) -> Outcome {
    let Some(previous) = previous else {
        tracing::debug!(hash = %new_signature.hash.short(), "No stored state, accepting baseline");
        return Outcome::FirstRun;
    };

    if previous.last_signature.rule_version != new_signature.rule_version {
        tracing::info!(
            stored_version = previous.last_signature.rule_version,
            rule_version = new_signature.rule_version,
            "Selection rule changed, re-baselining"
        );
        return Outcome::FirstRun;
    }

    if previous.last_signature.hash == new_signature.hash {
        return Outcome::Unchanged;
    }

    tracing::debug!(
        previous = %previous.last_signature.hash.short(),
        current = %new_signature.hash.short(),
        "Signature hash changed"
    );

    Outcome::Changed(ChangeEvent {
        target: previous.target.clone(),
        previous_signature: previous.last_signature.clone(),
        new_signature: new_signature.clone(),
        detected_at,
        seen_before: previous.seen_items.clone(),
    })
}
