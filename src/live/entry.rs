//! Transcript entry model shared by the snapshot, the live channel and local sends.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Speaker label used by the backend for the automated or human agent.
pub const AGENT_SPEAKER: &str = "agent";
/// Speaker label used by the backend for the customer.
pub const CUSTOMER_SPEAKER: &str = "customer";
/// Entry `type` marking a supervisor takeover.
pub const TAKEOVER_KIND: &str = "takeover";

/// Wall-clock creation stamp of an entry.
///
/// The backend emits either an ISO-8601 string or an epoch-millis number.
/// Numbers compare by value (`1700` equals `1700.0`); a string never equals a
/// number, so `"1700"` and `1700` are different stamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreateTime {
    /// Numeric stamp, normally epoch milliseconds.
    Number(serde_json::Number),
    /// Textual stamp, normally RFC 3339.
    Text(String),
}

impl CreateTime {
    /// Stamp for an epoch-millis instant.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self::Number(serde_json::Number::from(millis))
    }

    /// Stamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// Best-effort conversion to epoch milliseconds.
    ///
    /// Numeric strings are read as millis, other strings as RFC 3339.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Self::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value.round() as i64)),
            Self::Text(text) => text.trim().parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|parsed| parsed.timestamp_millis())
            }),
        }
    }
}

impl PartialEq for CreateTime {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(left), Self::Text(right)) => left == right,
            (Self::Number(left), Self::Number(right)) => numbers_equal(left, right),
            _ => false,
        }
    }
}

impl Eq for CreateTime {}

#[allow(clippy::float_cmp)]
fn numbers_equal(left: &serde_json::Number, right: &serde_json::Number) -> bool {
    if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
        return left == right;
    }
    if let (Some(left), Some(right)) = (left.as_u64(), right.as_u64()) {
        return left == right;
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

impl fmt::Display for CreateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<DateTime<Utc>> for CreateTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339())
    }
}

/// One utterance or control marker of a conversation.
///
/// `text` and `create_time` stay optional because live frames are not
/// validated; an entry missing either is malformed and never deduplicated.
/// Fields that are null or of the wrong JSON type decode to their default
/// instead of rejecting the whole entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Speaker label (`agent`, `customer`, or empty for control markers).
    #[serde(default, deserialize_with = "lenient")]
    pub speaker: String,
    /// Utterance content.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Offset in seconds within the conversation.
    #[serde(default, deserialize_with = "lenient")]
    pub start_time: f64,
    /// End offset in seconds; see [`TranscriptEntry::end_time`].
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    /// Dedup and ordering key.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub create_time: Option<CreateTime>,
    /// Optional control kind, e.g. `takeover`.
    #[serde(
        default,
        rename = "type",
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
}

/// Decode a field, falling back to its default when the value does not fit.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl TranscriptEntry {
    /// Build an ordinary utterance.
    #[must_use]
    pub fn utterance(
        speaker: impl Into<String>,
        text: impl Into<String>,
        create_time: CreateTime,
    ) -> Self {
        Self {
            speaker: speaker.into(),
            text: Some(text.into()),
            start_time: 0.0,
            end_time: None,
            create_time: Some(create_time),
            kind: None,
        }
    }

    /// Build the marker recorded when a supervisor takes over.
    #[must_use]
    pub fn takeover_marker(create_time: CreateTime) -> Self {
        Self {
            speaker: String::new(),
            text: Some(String::new()),
            start_time: 0.0,
            end_time: Some(0.0),
            create_time: Some(create_time),
            kind: Some(TAKEOVER_KIND.to_string()),
        }
    }

    /// Build a supervisor chat message stamped with the current instant.
    #[must_use]
    pub fn supervisor_message(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis();
        #[allow(clippy::cast_precision_loss)]
        let seconds = millis as f64 / 1000.0;
        Self {
            speaker: AGENT_SPEAKER.to_string(),
            text: Some(text.into()),
            start_time: seconds,
            end_time: Some(seconds + 0.01),
            create_time: Some(CreateTime::from_millis(millis)),
            kind: None,
        }
    }

    /// Text content, empty when absent.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// End offset, defaulting to one second after the start.
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.end_time.unwrap_or(self.start_time + 1.0)
    }

    /// Dedup identity: `(text, create_time)`, or `None` when the entry is malformed.
    #[must_use]
    pub fn identity(&self) -> Option<(&str, &CreateTime)> {
        match (&self.text, &self.create_time) {
            (Some(text), Some(create_time)) => Some((text.as_str(), create_time)),
            _ => None,
        }
    }

    /// Whether both entries are the same entry under the dedup identity.
    #[must_use]
    pub fn same_entry(&self, other: &Self) -> bool {
        match (self.identity(), other.identity()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }

    /// Whether this entry records a supervisor takeover.
    #[must_use]
    pub fn is_takeover(&self) -> bool {
        self.kind.as_deref() == Some(TAKEOVER_KIND)
    }

    /// Whether the speaker is the customer (case-insensitive).
    #[must_use]
    pub fn is_customer(&self) -> bool {
        self.speaker.eq_ignore_ascii_case(CUSTOMER_SPEAKER)
    }

    /// Whether the speaker is the agent (case-insensitive).
    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.speaker.eq_ignore_ascii_case(AGENT_SPEAKER)
    }
}
