//! Live session reducer.
//!
//! A [`LiveSession`] holds everything the supervisor sees for one open
//! conversation: the REST snapshot, the channel message set, the entries sent
//! locally, the merged transcript, the statistics and the takeover state.
//! Channel events are applied with [`LiveSession::apply`]; supervisor actions
//! are the only operations that await the backend.

use std::slice;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::client::ConversationApi;
use crate::backend::records::ConversationSnapshot;
use crate::live::channel::ChannelEvent;
use crate::live::entry::{CreateTime, TranscriptEntry};
use crate::live::error::{LiveError, LiveResult};
use crate::live::merge::{MergeOutcome, append_if_absent, merge};
use crate::live::statistics::ConversationStatistics;
use crate::live::takeover::{TakeoverMachine, TakeoverOrigin, TakeoverState};

/// Serializable picture of a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionView {
    /// Conversation identifier.
    pub conversation_id: String,
    /// Merged transcript.
    pub transcript: Vec<TranscriptEntry>,
    /// Current statistics.
    pub statistics: ConversationStatistics,
    /// Takeover state.
    pub takeover: TakeoverState,
    /// Whether the takeover came from this desk or was observed in the transcript.
    pub takeover_origin: Option<TakeoverOrigin>,
    /// Transient "agent is composing" indicator.
    pub agent_composing: bool,
    /// Whether the channel is connected.
    pub live: bool,
    /// Whether the conversation was finalized from this session.
    pub finalized: bool,
}

/// State of one open conversation.
pub struct LiveSession {
    conversation_id: String,
    analyst_id: String,
    api: Arc<dyn ConversationApi>,
    initial: Vec<TranscriptEntry>,
    channel: Vec<TranscriptEntry>,
    local: Vec<TranscriptEntry>,
    merged: MergeOutcome,
    statistics: ConversationStatistics,
    takeover: TakeoverMachine,
    live: bool,
    finalized: bool,
}

impl LiveSession {
    /// Start a session from a REST snapshot.
    #[must_use]
    pub fn new(
        snapshot: ConversationSnapshot,
        api: Arc<dyn ConversationApi>,
        analyst_id: impl Into<String>,
    ) -> Self {
        let mut session = Self {
            conversation_id: snapshot.id,
            analyst_id: analyst_id.into(),
            api,
            initial: snapshot.entries,
            channel: Vec::new(),
            local: Vec::new(),
            merged: MergeOutcome::default(),
            statistics: snapshot.statistics,
            takeover: TakeoverMachine::new(),
            live: false,
            finalized: false,
        };
        session.remerge();
        session
    }

    /// Conversation identifier.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Entries the channel should be seeded with.
    #[must_use]
    pub fn initial_entries(&self) -> &[TranscriptEntry] {
        &self.initial
    }

    /// Merged transcript.
    #[must_use]
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.merged.entries
    }

    /// Current statistics.
    #[must_use]
    pub const fn statistics(&self) -> &ConversationStatistics {
        &self.statistics
    }

    /// Takeover state.
    #[must_use]
    pub const fn takeover_state(&self) -> TakeoverState {
        self.takeover.state()
    }

    /// Whether a supervisor is in control.
    #[must_use]
    pub fn is_taken_over(&self) -> bool {
        self.takeover.is_taken_over()
    }

    /// Shown while the customer waits on the automated agent.
    #[must_use]
    pub fn agent_composing(&self) -> bool {
        self.merged.customer_awaiting_reply && !self.is_taken_over()
    }

    /// Whether the channel is connected.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live
    }

    /// Whether the session was finalized.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Snapshot of the session for rendering.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            conversation_id: self.conversation_id.clone(),
            transcript: self.merged.entries.clone(),
            statistics: self.statistics.clone(),
            takeover: self.takeover.state(),
            takeover_origin: self.takeover.origin(),
            agent_composing: self.agent_composing(),
            live: self.live,
            finalized: self.finalized,
        }
    }

    /// Apply one channel event. Returns whether anything visible changed.
    pub fn apply(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Seeded(entries) => {
                self.live = true;
                for entry in &entries {
                    append_if_absent(&mut self.channel, entry);
                }
                self.remerge();
                true
            }
            ChannelEvent::Entries(entries) => {
                let mut appended = false;
                for entry in &entries {
                    appended |= append_if_absent(&mut self.channel, entry);
                }
                if appended {
                    self.remerge();
                }
                appended
            }
            ChannelEvent::Statistics(update) => self.statistics.apply(&update),
            ChannelEvent::Closed => std::mem::replace(&mut self.live, false),
        }
    }

    /// Mark the channel as gone without an event, e.g. after a local close.
    pub const fn mark_offline(&mut self) {
        self.live = false;
    }

    /// Ask the backend for a takeover.
    ///
    /// On success the session records a takeover marker and returns `true`.
    /// Any failure leaves the state unchanged and returns `false`.
    pub async fn request_takeover(&mut self) -> bool {
        if self.finalized {
            warn!(conversation_id = %self.conversation_id, "Takeover requested after finalize");
            return false;
        }
        if self.is_taken_over() {
            return true;
        }
        if !self.api.takeover(&self.conversation_id).await {
            return false;
        }

        self.takeover.confirm_local();
        self.local
            .push(TranscriptEntry::takeover_marker(CreateTime::now()));
        self.remerge();
        true
    }

    /// Send a supervisor message.
    ///
    /// The entry is shown immediately and withdrawn if the backend rejects it.
    ///
    /// # Errors
    /// - [`LiveError::NotTakenOver`] before a takeover.
    /// - [`LiveError::EmptyMessage`] for blank text.
    /// - [`LiveError::Finalized`] after finalize.
    /// - [`LiveError::Backend`] when submission fails.
    pub async fn send_message(&mut self, text: &str) -> LiveResult<TranscriptEntry> {
        if self.finalized {
            return Err(LiveError::Finalized);
        }
        if !self.is_taken_over() {
            return Err(LiveError::NotTakenOver);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(LiveError::EmptyMessage);
        }

        let entry = TranscriptEntry::supervisor_message(text, Utc::now());
        self.local.push(entry.clone());
        self.remerge();

        let submitted = self
            .api
            .append_messages(
                &self.conversation_id,
                slice::from_ref(&entry),
                &self.analyst_id,
            )
            .await;

        if let Err(err) = submitted {
            warn!(conversation_id = %self.conversation_id, ?err, "Supervisor message rejected");
            if let Some(position) = self.local.iter().rposition(|local| local == &entry) {
                self.local.remove(position);
            }
            self.remerge();
            return Err(err.into());
        }
        Ok(entry)
    }

    /// Finalize the conversation.
    ///
    /// The session ends whatever the backend answers; the result only reports
    /// whether the backend confirmed.
    ///
    /// # Errors
    /// - [`LiveError::NotTakenOver`] before a takeover.
    /// - [`LiveError::Finalized`] when already finalized.
    /// - [`LiveError::Backend`] when the backend did not confirm.
    pub async fn finalize(&mut self) -> LiveResult<()> {
        if self.finalized {
            return Err(LiveError::Finalized);
        }
        if !self.is_taken_over() {
            return Err(LiveError::NotTakenOver);
        }

        let result = self
            .api
            .finalize(&self.conversation_id, &self.analyst_id)
            .await;
        self.finalized = true;
        self.live = false;

        match result {
            Ok(()) => {
                info!(conversation_id = %self.conversation_id, "Conversation finalized");
                Ok(())
            }
            Err(err) => {
                warn!(conversation_id = %self.conversation_id, ?err, "Finalize not confirmed");
                Err(err.into())
            }
        }
    }

    fn remerge(&mut self) {
        self.merged = merge(&self.initial, &self.channel, &self.local);
        self.takeover.observe(self.merged.has_takeover_marker);
    }
}
