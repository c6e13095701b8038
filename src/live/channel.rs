//! Live WebSocket channel for one conversation.
//!
//! The channel owns one background task per connection. The task classifies
//! every inbound frame and forwards the result as a [`ChannelEvent`] through an
//! unbounded receiver handed out by [`LiveChannel::open`]. Nothing is retried:
//! a lost connection clears the open guard and the next `open` reconnects.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::error::BackendResult;
use crate::live::classifier::{ClassifiedFrame, classify};
use crate::live::entry::TranscriptEntry;
use crate::live::statistics::StatisticsUpdate;

/// Handshake budget used unless [`LiveChannel::with_connect_timeout`] overrides it.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Topics subscribed on every connection.
pub const CHANNEL_TOPICS: [&str; 4] = ["message", "statistics", "finalize", "takeover"];

/// Event delivered by the channel task.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// The connection opened; carries the entries the channel set starts from.
    Seeded(Vec<TranscriptEntry>),
    /// Transcript entries pushed by the backend.
    Entries(Vec<TranscriptEntry>),
    /// Partial statistics pushed by the backend.
    Statistics(StatisticsUpdate),
    /// The connection ended or could not be established.
    Closed,
}

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Never opened.
    #[default]
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Frames flow both ways.
    Open,
    /// Closed locally or by the peer.
    Closed,
}

#[derive(Debug, Default)]
struct ChannelShared {
    last_opened: Option<String>,
    state: ChannelState,
    generation: u64,
}

/// Handle on the live connection of at most one conversation.
pub struct LiveChannel {
    ws_base: String,
    lang: String,
    connect_timeout: Duration,
    shared: Arc<Mutex<ChannelShared>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl LiveChannel {
    /// Create an idle channel that connects below `ws_base`.
    #[must_use]
    pub fn new(ws_base: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into().trim_end_matches('/').to_string(),
            lang: lang.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shared: Arc::new(Mutex::new(ChannelShared::default())),
            outbound: None,
        }
    }

    /// Give up on a handshake that takes longer than `timeout`.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        lock(&self.shared).state
    }

    /// Conversation the channel is connected (or connecting) to.
    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.shared).last_opened.clone()
    }

    /// Connect to `conversation_id`.
    ///
    /// Returns `None` when that conversation is already connected or connecting,
    /// or when the URL cannot be built. A connection to another conversation is
    /// closed first. The first event on the receiver is [`ChannelEvent::Seeded`]
    /// with `initial` once the handshake succeeds.
    #[must_use]
    pub fn open(
        &mut self,
        conversation_id: &str,
        access_token: Option<&str>,
        initial: Vec<TranscriptEntry>,
    ) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        let current = lock(&self.shared).last_opened.clone();
        match current {
            Some(open_id) if open_id == conversation_id => {
                debug!(conversation_id, "Channel already open");
                return None;
            }
            Some(_) => self.close(),
            None => {}
        }

        let url = match build_channel_url(&self.ws_base, conversation_id, access_token, &self.lang)
        {
            Ok(url) => url,
            Err(err) => {
                warn!(conversation_id, ?err, "Invalid channel url");
                return None;
            }
        };

        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.last_opened = Some(conversation_id.to_string());
            shared.state = ChannelState::Connecting;
            shared.generation
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);

        let task = ConnectionTask {
            url,
            conversation_id: conversation_id.to_string(),
            generation,
            connect_timeout: self.connect_timeout,
            shared: Arc::clone(&self.shared),
            events: event_tx,
        };
        tokio::spawn(task.run(outbound_rx, initial));

        Some(event_rx)
    }

    /// Push an entry to the backend. Dropped with a warning unless open.
    pub fn send(&self, entry: &TranscriptEntry) {
        if self.state() != ChannelState::Open {
            warn!("Cannot send entry: channel not open");
            return;
        }
        let Some(outbound) = &self.outbound else {
            return;
        };
        match serde_json::to_string(entry) {
            Ok(json) => {
                if outbound.send(json).is_err() {
                    warn!("Cannot send entry: channel task stopped");
                }
            }
            Err(err) => warn!(?err, "Failed to serialize outbound entry"),
        }
    }

    /// Close the connection, if any, and clear the open guard.
    pub fn close(&mut self) {
        let mut shared = lock(&self.shared);
        if let Some(conversation_id) = shared.last_opened.take() {
            info!(%conversation_id, "Closing live channel");
        }
        shared.generation += 1;
        if shared.state != ChannelState::Idle {
            shared.state = ChannelState::Closed;
        }
        drop(shared);
        self.outbound = None;
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build `{ws_base}/conversations/ws/{id}` with the subscription query.
///
/// # Errors
/// Returns an error if the resulting URL is invalid.
pub fn build_channel_url(
    ws_base: &str,
    conversation_id: &str,
    access_token: Option<&str>,
    lang: &str,
) -> BackendResult<Url> {
    let mut url = Url::parse(&format!(
        "{}/conversations/ws/{conversation_id}",
        ws_base.trim_end_matches('/')
    ))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(token) = access_token {
            query.append_pair("access_token", token);
        }
        query.append_pair("lang", lang);
        for topic in CHANNEL_TOPICS {
            query.append_pair("topics", topic);
        }
    }
    Ok(url)
}

fn lock(shared: &Mutex<ChannelShared>) -> MutexGuard<'_, ChannelShared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct ConnectionTask {
    url: Url,
    conversation_id: String,
    generation: u64,
    connect_timeout: Duration,
    shared: Arc<Mutex<ChannelShared>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ConnectionTask {
    async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<String>,
        initial: Vec<TranscriptEntry>,
    ) {
        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let stream = match handshake.await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                warn!(conversation_id = %self.conversation_id, %err, "Live channel connect failed");
                self.finish();
                return;
            }
            Err(_) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    timeout = ?self.connect_timeout,
                    "Live channel connect timed out"
                );
                self.finish();
                return;
            }
        };

        if !self.set_state(ChannelState::Open) {
            debug!(conversation_id = %self.conversation_id, "Channel superseded before open");
            return;
        }
        info!(conversation_id = %self.conversation_id, "Live channel open");
        if self.events.send(ChannelEvent::Seeded(initial)).is_err() {
            self.finish();
            return;
        }

        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !self.forward(&text) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(conversation_id = %self.conversation_id, "Live channel closed by peer");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(conversation_id = %self.conversation_id, %err, "Live channel read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                message = outbound.recv() => match message {
                    Some(json) => {
                        if let Err(err) = write.send(Message::Text(json)).await {
                            warn!(conversation_id = %self.conversation_id, %err, "Live channel send failed");
                            break;
                        }
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        debug!(conversation_id = %self.conversation_id, "Live channel released");
                        return;
                    }
                },
            }
        }

        self.finish();
    }

    /// Classify a text frame and forward it. Returns `false` once nobody listens.
    fn forward(&self, text: &str) -> bool {
        let event = match classify(text) {
            ClassifiedFrame::Message(entries) => ChannelEvent::Entries(entries),
            ClassifiedFrame::Statistics(update) => ChannelEvent::Statistics(update),
            ClassifiedFrame::Ignored => return true,
        };
        self.events.send(event).is_ok()
    }

    /// Update the shared state if this task still owns the channel.
    fn set_state(&self, state: ChannelState) -> bool {
        let mut shared = lock(&self.shared);
        if shared.generation != self.generation {
            return false;
        }
        shared.state = state;
        true
    }

    fn finish(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.generation == self.generation {
                shared.state = ChannelState::Closed;
                shared.last_opened = None;
            }
        }
        let _ = self.events.send(ChannelEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_carries_topics() {
        let url = build_channel_url("wss://desk.example.com/api/", "c-42", Some("tok en"), "en")
            .map(|url| url.to_string())
            .unwrap_or_default();
        assert_eq!(
            url,
            "wss://desk.example.com/api/conversations/ws/c-42?access_token=tok+en&lang=en\
             &topics=message&topics=statistics&topics=finalize&topics=takeover"
        );
    }

    #[test]
    fn test_channel_url_without_token() {
        let url = build_channel_url("ws://localhost:8000/api", "c-1", None, "fr")
            .map(|url| url.to_string())
            .unwrap_or_default();
        assert!(url.starts_with("ws://localhost:8000/api/conversations/ws/c-1?lang=fr&"));
    }

    #[test]
    fn test_send_before_open_is_dropped() {
        let channel = LiveChannel::new("ws://localhost:1/api", "en");
        assert_eq!(channel.state(), ChannelState::Idle);
        channel.send(&TranscriptEntry::default());
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_failed_connect_clears_guard() {
        let mut channel = LiveChannel::new("ws://127.0.0.1:1/api", "en");
        let Some(mut events) = channel.open("c-1", None, Vec::new()) else {
            panic!("first open should start a connection");
        };
        assert!(channel.open("c-1", None, Vec::new()).is_none());

        assert_eq!(events.recv().await, Some(ChannelEvent::Closed));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.conversation_id(), None);
        assert!(channel.open("c-1", None, Vec::new()).is_some());
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let mut channel = LiveChannel::new(format!("ws://{addr}/api"), "en")
            .with_connect_timeout(Duration::from_millis(200));

        let Some(mut events) = channel.open("c-1", None, Vec::new()) else {
            panic!("first open should start a connection");
        };
        let closed = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert_eq!(closed.ok().flatten(), Some(ChannelEvent::Closed));
        assert_eq!(channel.conversation_id(), None);
        assert!(channel.open("c-1", None, Vec::new()).is_some());
        drop(listener);
    }
}
