//! Turn classified stream events into sub-state updates.
//!
//! Each processor recognizes one family of payloads and answers `None` for
//! everything else, so the controller can fall back from one to the other.

mod chat;
mod step;

pub use chat::ChatProcessor;
pub use chat::ChatUpdate;
pub use step::StepProcessor;
pub use step::StepUpdate;

use serde_json::Value;

const IDENTITY_KEYS: [&str; 4] = ["id", "uuid", "timestamp", "ts"];

fn has_identity(value: &Value) -> bool {
    IDENTITY_KEYS
        .iter()
        .any(|key| value.get(*key).is_some_and(|part| !part.is_null()))
}

/// Gives `entry` an `id` when it carries no identity of its own, so that
/// history deduplication never collapses distinct entries.
fn ensure_identity(mut entry: Value, fallback: impl FnOnce() -> String) -> Value {
    if has_identity(&entry) {
        return entry;
    }
    let nested = entry
        .get("content")
        .and_then(|content| content.get("uuid").or_else(|| content.get("id")))
        .filter(|id| !id.is_null())
        .cloned();
    if let Value::Object(map) = &mut entry {
        map.insert(
            "id".to_string(),
            nested.unwrap_or_else(|| Value::String(fallback())),
        );
    }
    entry
}
