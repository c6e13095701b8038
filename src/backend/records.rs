//! Raw backend conversation records and the views derived from them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::live::entry::{CreateTime, CUSTOMER_SPEAKER, TranscriptEntry};
use crate::live::statistics::{ConversationStatistics, Sentiment};

/// Conversation status while the automated agent is in control.
pub const STATUS_IN_PROGRESS: &str = "in_progress";
/// Conversation status after a supervisor takeover.
pub const STATUS_TAKEOVER: &str = "takeover";

/// Conversation record as returned by the backend.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConversationRecord {
    /// Backend identifier.
    pub id: String,
    /// Lifecycle status (`in_progress`, `takeover`, `finalized`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Serialized transcript (JSON string, array, or plain text).
    #[serde(default)]
    pub transcription: Option<Value>,
    /// Post-processing analysis.
    #[serde(default)]
    pub analysis: Option<ConversationAnalysis>,
    /// Recording metadata for calls.
    #[serde(default)]
    pub recording: Option<Recording>,
    /// Duration in seconds (sometimes milliseconds).
    #[serde(default)]
    pub duration: Option<f64>,
    /// Agent speaking share.
    #[serde(default)]
    pub agent_ratio: Option<f64>,
    /// Customer speaking share.
    #[serde(default)]
    pub customer_ratio: Option<f64>,
    /// Words spoken.
    #[serde(default)]
    pub word_count: Option<u64>,
    /// Running hostility score.
    #[serde(default)]
    pub in_progress_hostility_score: Option<f64>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Analysis block of a conversation record.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConversationAnalysis {
    /// Detected topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Positive sentiment score.
    #[serde(default)]
    pub positive_sentiment: f64,
    /// Neutral sentiment score.
    #[serde(default)]
    pub neutral_sentiment: f64,
    /// Negative sentiment score.
    #[serde(default)]
    pub negative_sentiment: f64,
    /// Overall tone label.
    #[serde(default)]
    pub tone: Option<String>,
    /// Customer satisfaction score.
    #[serde(default)]
    pub customer_satisfaction: Option<f64>,
    /// Resolution rate.
    #[serde(default)]
    pub resolution_rate: Option<f64>,
    /// Quality of service.
    #[serde(default)]
    pub quality_of_service: Option<f64>,
}

/// Recording metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Recording {
    /// Backend-relative audio path.
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Channel type of a conversation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Voice call (has a recording).
    Call,
    /// Text chat.
    Chat,
}

/// Entry in the active conversation list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveConversation {
    /// Backend identifier.
    pub id: String,
    /// Call or chat.
    pub kind: ConversationKind,
    /// `in_progress` or `takeover`.
    pub status: String,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Running hostility score, 0 when unknown.
    pub in_progress_hostility_score: f64,
    /// Duration in seconds, as reported.
    pub duration: Option<f64>,
    /// Words spoken.
    pub word_count: Option<u64>,
    /// Agent speaking share.
    pub agent_ratio: Option<f64>,
    /// Customer speaking share.
    pub customer_ratio: Option<f64>,
}

impl ActiveConversation {
    /// Build a list entry from a record, if the record is still live.
    #[must_use]
    pub fn from_record(record: &ConversationRecord) -> Option<Self> {
        let status = record.status.as_deref()?;
        if status != STATUS_IN_PROGRESS && status != STATUS_TAKEOVER {
            return None;
        }
        Some(Self {
            id: record.id.clone(),
            kind: record.kind(),
            status: status.to_string(),
            created_at: record.created_at.clone(),
            in_progress_hostility_score: record.in_progress_hostility_score.unwrap_or(0.0),
            duration: record.duration,
            word_count: record.word_count,
            agent_ratio: record.agent_ratio,
            customer_ratio: record.customer_ratio,
        })
    }
}

/// Snapshot of the active conversation list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveConversations {
    /// Number of listed conversations.
    pub total: usize,
    /// Listed conversations.
    pub conversations: Vec<ActiveConversation>,
}

impl ActiveConversations {
    /// Build the list from raw records, dropping those no longer live.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ConversationRecord>) -> Self {
        let conversations: Vec<ActiveConversation> = records
            .into_iter()
            .filter_map(ActiveConversation::from_record)
            .collect();
        Self {
            total: conversations.len(),
            conversations,
        }
    }
}

/// History and statistics a live session starts from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationSnapshot {
    /// Backend identifier.
    pub id: String,
    /// Lifecycle status, if reported.
    pub status: Option<String>,
    /// Transcript so far.
    pub entries: Vec<TranscriptEntry>,
    /// Statistics known from the record.
    pub statistics: ConversationStatistics,
}

impl ConversationRecord {
    /// Call when a recording exists, chat otherwise.
    #[must_use]
    pub const fn kind(&self) -> ConversationKind {
        if self.recording.is_some() {
            ConversationKind::Call
        } else {
            ConversationKind::Chat
        }
    }

    /// Build the session starting point from this record.
    ///
    /// Never fails: malformed transcripts degrade to an empty history.
    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        let mut statistics = ConversationStatistics {
            agent_ratio: self.agent_ratio,
            customer_ratio: self.customer_ratio,
            duration: None,
            in_progress_hostility_score: self.in_progress_hostility_score,
            word_count: self.word_count,
            topic: None,
            sentiment: None,
        };
        statistics.apply(&crate::live::statistics::StatisticsUpdate {
            duration: self.duration,
            ..Default::default()
        });

        if let Some(analysis) = &self.analysis {
            statistics.topic.clone_from(&analysis.topic);
            statistics.sentiment = Some(Sentiment::dominant(
                analysis.positive_sentiment,
                analysis.neutral_sentiment,
                analysis.negative_sentiment,
            ));
        }

        let fallback_time = self
            .created_at
            .clone()
            .map_or_else(CreateTime::now, CreateTime::Text);

        ConversationSnapshot {
            id: self.id.clone(),
            status: self.status.clone(),
            entries: parse_transcription(self.transcription.as_ref(), &fallback_time),
            statistics,
        }
    }
}

/// Parse a backend transcription into normalized entries.
///
/// - A JSON array (or a string holding one) yields one entry per object item.
/// - A string that is not JSON is treated as a single customer utterance
///   stamped with `fallback_time`.
/// - Any other JSON shape yields an empty transcript.
#[must_use]
pub fn parse_transcription(
    transcription: Option<&Value>,
    fallback_time: &CreateTime,
) -> Vec<TranscriptEntry> {
    match transcription {
        Some(Value::Array(items)) => normalize_items(items),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => normalize_items(&items),
                Ok(_) => {
                    tracing::debug!("Transcription JSON is not an array, using empty transcript");
                    Vec::new()
                }
                Err(_) => vec![TranscriptEntry::utterance(
                    CUSTOMER_SPEAKER,
                    trimmed,
                    fallback_time.clone(),
                )],
            }
        }
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            tracing::warn!("Unexpected transcription shape, using empty transcript");
            Vec::new()
        }
    }
}

fn normalize_items(items: &[Value]) -> Vec<TranscriptEntry> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<TranscriptEntry>(item.clone()) {
            Ok(entry) => Some(normalize_entry(entry)),
            Err(err) => {
                tracing::debug!(%err, "Skipping non-object transcript item");
                None
            }
        })
        .collect()
}

/// Fill the defaults REST history entries are expected to carry.
fn normalize_entry(mut entry: TranscriptEntry) -> TranscriptEntry {
    if entry.speaker.is_empty() && !entry.is_takeover() {
        entry.speaker = "Unknown".to_string();
    }
    if entry.text.is_none() {
        entry.text = Some(String::new());
    }
    entry.end_time = Some(entry.end_time());
    if entry.create_time.is_none() {
        entry.create_time = Some(CreateTime::from(Utc::now()));
    }
    entry
}
