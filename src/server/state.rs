//! Application state shared across all request handlers.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::client::{ConversationApi, HttpConversationApi};
use crate::backend::error::BackendResult;
use crate::backend::kv_store::SqliteKeyValueStore;
use crate::backend::poller::ActiveConversationPoller;
use crate::backend::records::ActiveConversations;
use crate::backend::resolver::EndpointResolver;
use crate::config::DeskConfig;
use crate::live::channel::{ChannelEvent, LiveChannel};
use crate::live::session::LiveSession;

/// The conversation currently open on the desk.
pub struct OpenConversation {
    /// Session reducer, shared with the pump task.
    pub session: Arc<Mutex<LiveSession>>,
    conversation_id: String,
    channel: LiveChannel,
    pump: Option<JoinHandle<()>>,
}

impl OpenConversation {
    /// Wrap a session and the channel it will listen on.
    #[must_use]
    pub fn new(session: LiveSession, channel: LiveChannel) -> Self {
        Self {
            conversation_id: session.conversation_id().to_string(),
            session: Arc::new(Mutex::new(session)),
            channel,
            pump: None,
        }
    }

    /// Conversation identifier.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Open the channel unless it already holds its guard.
    ///
    /// Returns whether a new connection was started.
    pub async fn connect(&mut self, access_token: Option<&str>) -> bool {
        let initial = self.session.lock().await.initial_entries().to_vec();
        let Some(events) = self
            .channel
            .open(&self.conversation_id, access_token, initial)
        else {
            return false;
        };
        if let Some(previous) = self.pump.take() {
            previous.abort();
        }
        self.pump = Some(spawn_pump(Arc::clone(&self.session), events));
        true
    }

    fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.channel.close();
    }
}

impl Drop for OpenConversation {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_pump(
    session: Arc<Mutex<LiveSession>>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if session.lock().await.apply(event) {
                debug!("Live session updated");
            }
        }
    })
}

/// Shared application state.
pub struct AppState {
    /// Desk configuration.
    pub config: DeskConfig,
    /// REST collaborators.
    pub api: Arc<dyn ConversationApi>,
    /// Endpoint resolver, used for the live channel base.
    pub resolver: Arc<EndpointResolver>,
    /// Latest active conversation list.
    pub conversations: watch::Receiver<ActiveConversations>,
    /// Wakes the list poller.
    pub refresh: Arc<Notify>,
    /// Open conversation, if any.
    pub desk: Mutex<Option<OpenConversation>>,
}

impl AppState {
    /// Assemble state around existing collaborators.
    #[must_use]
    pub fn new(
        config: DeskConfig,
        api: Arc<dyn ConversationApi>,
        resolver: Arc<EndpointResolver>,
        poller: &ActiveConversationPoller,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            api,
            resolver,
            conversations: poller.subscribe(),
            refresh: poller.refresh_handle(),
            desk: Mutex::new(None),
        })
    }

    /// Build the production collaborators from configuration.
    ///
    /// Returns the state and the poller, which the caller spawns.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or storage cannot be opened.
    pub async fn from_config(
        config: DeskConfig,
    ) -> BackendResult<(Arc<Self>, ActiveConversationPoller)> {
        config.validate()?;
        let store = Arc::new(SqliteKeyValueStore::new(&config.storage).await?);
        let resolver = Arc::new(EndpointResolver::new(&config.endpoints, store)?);
        let api: Arc<dyn ConversationApi> =
            Arc::new(HttpConversationApi::new(&config, Arc::clone(&resolver))?);
        let poller = ActiveConversationPoller::new(Arc::clone(&api), config.poller.clone());
        let state = Self::new(config, api, resolver, &poller);
        Ok((state, poller))
    }

    /// Close the open conversation, if any, and wake the poller.
    ///
    /// Returns whether a conversation was open.
    pub async fn close_desk(&self) -> bool {
        let previous = self.desk.lock().await.take();
        self.finish_close(previous).await
    }

    /// Close the open conversation only if it still holds `session`, then wake the poller.
    ///
    /// A conversation opened in the meantime is left alone.
    pub async fn close_desk_for(&self, session: &Arc<Mutex<LiveSession>>) -> bool {
        let previous = {
            let mut desk = self.desk.lock().await;
            let still_open = desk
                .as_ref()
                .is_some_and(|open| Arc::ptr_eq(&open.session, session));
            if still_open { desk.take() } else { None }
        };
        self.finish_close(previous).await
    }

    async fn finish_close(&self, previous: Option<OpenConversation>) -> bool {
        let closed = match previous {
            Some(open) => {
                open.session.lock().await.mark_offline();
                info!(conversation_id = open.conversation_id(), "Conversation closed");
                true
            }
            None => false,
        };
        self.refresh.notify_one();
        closed
    }
}
