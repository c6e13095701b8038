//! Classification of raw channel frames.

use serde_json::Value;

use crate::live::entry::TranscriptEntry;
use crate::live::statistics::StatisticsUpdate;

/// Topic tag of transcript frames.
pub const MESSAGE_TOPIC: &str = "message";
/// Topic tag of statistics frames.
pub const STATISTICS_TOPIC: &str = "statistics";

/// Interpretation of one inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifiedFrame {
    /// One or more transcript entries.
    Message(Vec<TranscriptEntry>),
    /// A partial statistics update.
    Statistics(StatisticsUpdate),
    /// Anything else, including unparseable frames.
    Ignored,
}

/// Classify a raw text frame. Never fails.
#[must_use]
pub fn classify(raw: &str) -> ClassifiedFrame {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => classify_value(&value),
        Err(err) => {
            tracing::debug!(%err, "Ignoring unparseable channel frame");
            ClassifiedFrame::Ignored
        }
    }
}

/// Classify an already-parsed frame.
#[must_use]
pub fn classify_value(frame: &Value) -> ClassifiedFrame {
    let payload = frame.get("payload");
    match (topic(frame), payload) {
        (Some(MESSAGE_TOPIC), Some(payload)) => {
            let entries = message_entries(payload);
            if entries.is_empty() {
                ClassifiedFrame::Ignored
            } else {
                ClassifiedFrame::Message(entries)
            }
        }
        (Some(STATISTICS_TOPIC), Some(Value::Object(object))) => {
            ClassifiedFrame::Statistics(StatisticsUpdate::from_object(object))
        }
        _ => ClassifiedFrame::Ignored,
    }
}

/// `topic` tag, falling back to the legacy `type` field.
fn topic(frame: &Value) -> Option<&str> {
    frame
        .get("topic")
        .and_then(Value::as_str)
        .or_else(|| frame.get("type").and_then(Value::as_str))
}

fn message_entries(payload: &Value) -> Vec<TranscriptEntry> {
    match payload {
        Value::Array(items) => items.iter().filter_map(entry_from_value).collect(),
        Value::Object(_) => entry_from_value(payload).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn entry_from_value(value: &Value) -> Option<TranscriptEntry> {
    if !value.is_object() {
        tracing::debug!("Skipping non-object message payload item");
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(entry) => Some(entry),
        Err(err) => {
            tracing::debug!(%err, "Skipping malformed message payload item");
            None
        }
    }
}
