//! Live conversation statistics and the partial-update fold.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Durations above one day of seconds are assumed to be milliseconds.
///
/// The backend sometimes leaks millisecond durations; this is a heuristic,
/// not a unit detector, and will misread conversations longer than a day.
pub const DURATION_MILLIS_THRESHOLD: f64 = 86_400.0;

/// Dominant sentiment of a conversation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Positive.
    Positive,
    /// Neutral.
    Neutral,
    /// Negative.
    Negative,
}

impl Sentiment {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    /// Pick the strictly dominant sentiment from analysis scores, neutral on ties.
    #[must_use]
    pub fn dominant(positive: f64, neutral: f64, negative: f64) -> Self {
        if positive > neutral && positive > negative {
            Self::Positive
        } else if negative > positive && negative > neutral {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            _ => Err(value.to_string()),
        }
    }
}

/// Best-known statistics of a live conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationStatistics {
    /// Share of speaking time for the agent (0-100).
    pub agent_ratio: Option<f64>,
    /// Share of speaking time for the customer (0-100).
    pub customer_ratio: Option<f64>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Running hostility score (0-100).
    pub in_progress_hostility_score: Option<f64>,
    /// Words spoken so far.
    pub word_count: Option<u64>,
    /// Detected topic.
    pub topic: Option<String>,
    /// Dominant sentiment.
    pub sentiment: Option<Sentiment>,
}

/// Partial statistics carried by one `statistics` frame.
///
/// Only fields present with the expected JSON type are set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatisticsUpdate {
    /// Agent ratio, if present.
    pub agent_ratio: Option<f64>,
    /// Customer ratio, if present.
    pub customer_ratio: Option<f64>,
    /// Raw duration as emitted, if present.
    pub duration: Option<f64>,
    /// Hostility score, if present.
    pub in_progress_hostility_score: Option<f64>,
    /// Word count, if present.
    pub word_count: Option<u64>,
    /// Topic, if present.
    pub topic: Option<String>,
    /// Sentiment, if present and recognized.
    pub sentiment: Option<Sentiment>,
}

impl StatisticsUpdate {
    /// Read a partial update from a JSON object, skipping mistyped fields.
    #[must_use]
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let number = |key: &str| object.get(key).and_then(Value::as_f64);
        let text = |key: &str| object.get(key).and_then(Value::as_str);

        let word_count = object.get("word_count").and_then(|value| {
            value.as_u64().or_else(|| {
                value
                    .as_f64()
                    .filter(|count| count.is_finite() && *count >= 0.0)
                    .map(round_count)
            })
        });

        let sentiment = text("sentiment").and_then(|raw| match raw.parse::<Sentiment>() {
            Ok(sentiment) => Some(sentiment),
            Err(unknown) => {
                tracing::debug!(sentiment = %unknown, "Ignoring unknown sentiment");
                None
            }
        });

        Self {
            agent_ratio: number("agent_ratio"),
            customer_ratio: number("customer_ratio"),
            duration: number("duration"),
            in_progress_hostility_score: number("in_progress_hostility_score"),
            word_count,
            topic: text("topic").map(str::to_string),
            sentiment,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_count(count: f64) -> u64 {
    count.round() as u64
}

/// Normalize a duration that may have been emitted in milliseconds.
#[must_use]
pub fn normalize_duration(raw: f64) -> f64 {
    if raw > DURATION_MILLIS_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    }
}

impl ConversationStatistics {
    /// Apply a partial update in place.
    ///
    /// Returns whether any field changed value.
    pub fn apply(&mut self, incoming: &StatisticsUpdate) -> bool {
        let mut changed = false;
        changed |= replace_if_different(&mut self.agent_ratio, incoming.agent_ratio);
        changed |= replace_if_different(&mut self.customer_ratio, incoming.customer_ratio);
        changed |= replace_if_different(
            &mut self.duration,
            incoming.duration.map(normalize_duration),
        );
        changed |= replace_if_different(
            &mut self.in_progress_hostility_score,
            incoming.in_progress_hostility_score,
        );
        changed |= replace_if_different(&mut self.word_count, incoming.word_count);
        changed |= replace_if_different(&mut self.topic, incoming.topic.clone());
        changed |= replace_if_different(&mut self.sentiment, incoming.sentiment);
        changed
    }
}

/// Fold a partial update into the current statistics.
#[must_use]
pub fn fold(current: &ConversationStatistics, incoming: &StatisticsUpdate) -> ConversationStatistics {
    let mut next = current.clone();
    next.apply(incoming);
    next
}

fn replace_if_different<T: PartialEq>(slot: &mut Option<T>, incoming: Option<T>) -> bool {
    match incoming {
        Some(value) if slot.as_ref() != Some(&value) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}
