//! Tail one live conversation to stdout.
//!
//! Usage: `livedesk-watch <conversation-id>`

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use livedesk::backend::{
    ConversationApi, EndpointResolver, HttpConversationApi, KeyValueStore, SqliteKeyValueStore,
};
use livedesk::config::DeskConfig;
use livedesk::live::{ChannelEvent, LiveChannel, LiveSession, TranscriptEntry};
use livedesk::start_livedesk;

fn print_entry(entry: &TranscriptEntry) {
    if entry.is_takeover() {
        println!("-- supervisor took over");
        return;
    }
    let stamp = entry
        .create_time
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    println!("[{stamp}] {}: {}", entry.speaker, entry.text());
}

#[tokio::main]
async fn main() -> Result<()> {
    start_livedesk::init_tracing();

    let conversation_id = std::env::args()
        .nth(1)
        .context("usage: livedesk-watch <conversation-id>")?;

    let config = DeskConfig::from_env()?;
    config.validate()?;

    let store: Arc<dyn KeyValueStore> =
        Arc::new(SqliteKeyValueStore::new(&config.storage).await?);
    let resolver = Arc::new(EndpointResolver::new(&config.endpoints, store)?);
    let api = Arc::new(HttpConversationApi::new(&config, Arc::clone(&resolver))?);

    let record = api
        .fetch_conversation(&conversation_id)
        .await
        .with_context(|| format!("failed to load conversation {conversation_id}"))?;
    let mut session = LiveSession::new(record.snapshot(), api, config.live.analyst_id.clone());
    session.transcript().iter().for_each(print_entry);
    let mut printed = session.transcript().len();

    let endpoints = resolver.resolve().await?;
    let mut channel = LiveChannel::new(endpoints.ws_base, config.live.lang.clone())
        .with_connect_timeout(config.endpoints.request_timeout);
    let Some(mut events) = channel.open(
        &conversation_id,
        config.auth.access_token.as_deref(),
        session.initial_entries().to_vec(),
    ) else {
        bail!("could not open the live channel for {conversation_id}");
    };

    while let Some(event) = events.recv().await {
        let closed = matches!(event, ChannelEvent::Closed);
        let statistics = matches!(event, ChannelEvent::Statistics(_));

        if session.apply(event) {
            let transcript = session.transcript();
            transcript
                .get(printed..)
                .unwrap_or_default()
                .iter()
                .for_each(print_entry);
            printed = transcript.len();

            if statistics {
                println!("-- statistics {}", serde_json::to_string(session.statistics())?);
            }
        }

        if closed {
            println!("-- channel closed");
            break;
        }
    }

    Ok(())
}
