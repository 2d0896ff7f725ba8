//! Tolerant extraction of the `materials`/`tools` payload from assistant prose.
//!
//! The scan is a single greedy pattern match, not a JSON-aware parser: the
//! candidate span runs from the first `{` that can start a match to the last
//! `}` following both collection names, in either order. Only that first span is tried; if it
//! does not parse, later brace regions are not inspected.

use crate::models::Recommendations;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static PAYLOAD_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\{(?:.*"materials".*"tools"|.*"tools".*"materials").*\}"#)
        .expect("payload pattern compiles")
});

const EMPTY_AFTER_STRIP: &str = "I've prepared your recommendations based on your project details. You can view them in the recommendations panel.";

const ANNOUNCEMENTS: [&str; 3] = [
    "generating your personalized project list",
    "i'm generating your",
    "creating your project list",
];

/// Returns the recommendations embedded in `text`, or `None` when no span
/// matches or the span fails to parse/validate.
pub fn extract(text: &str) -> Option<Recommendations> {
    let span = PAYLOAD_SPAN.find(text)?.as_str();
    let value: Value = match serde_json::from_str(span) {
        Ok(value) => value,
        Err(err) => {
            debug!(target = "buildlist.extract", error = %err, "payload_span_not_json");
            return None;
        }
    };

    let shaped = value.get("materials").is_some_and(Value::is_array)
        && value.get("tools").is_some_and(Value::is_array);
    if !shaped {
        debug!(target = "buildlist.extract", "payload_missing_collections");
        return None;
    }

    let recommendations: Recommendations = match serde_json::from_value(value) {
        Ok(recs) => recs,
        Err(err) => {
            debug!(target = "buildlist.extract", error = %err, "payload_items_invalid");
            return None;
        }
    };

    if recommendations.items().any(|item| item.name.trim().is_empty()) {
        debug!(target = "buildlist.extract", "payload_item_without_name");
        return None;
    }
    Some(recommendations)
}

/// Removes the payload span from a reply meant for display.
pub fn strip_payload(text: &str) -> String {
    let Some(found) = PAYLOAD_SPAN.find(text) else {
        return text.to_string();
    };
    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..found.start()]);
    cleaned.push_str(&text[found.end()..]);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        EMPTY_AFTER_STRIP.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Whether the assistant says it is about to produce the final list.
pub fn announces_recommendations(text: &str) -> bool {
    let lower = text.to_lowercase();
    ANNOUNCEMENTS.iter().any(|phrase| lower.contains(phrase))
}
