//! Periodic refresh of the active conversation list.
//!
//! The list is pull-based and independent from any live session: it is
//! refreshed on a fixed interval and can be woken early after a takeover,
//! a finalize or a closed session.

use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::client::{ConversationApi, ConversationQuery};
use crate::backend::error::BackendResult;
use crate::backend::records::{ActiveConversations, STATUS_IN_PROGRESS, STATUS_TAKEOVER};
use crate::config::PollerConfig;

/// Optional creation-date bounds of the list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DateRange {
    /// Lower bound, ISO-8601.
    pub from_date: Option<String>,
    /// Upper bound, ISO-8601.
    pub to_date: Option<String>,
}

/// Fetch in-progress and taken-over conversations concurrently.
///
/// # Errors
/// Returns an error if either status query fails.
pub async fn fetch_active(
    api: &dyn ConversationApi,
    config: &PollerConfig,
    range: &DateRange,
) -> BackendResult<ActiveConversations> {
    let query_for = |status: &str| ConversationQuery {
        from_date: range.from_date.clone(),
        to_date: range.to_date.clone(),
        ..ConversationQuery::status(status, config.page_size, config.minimum_hostility_score)
    };
    let in_progress = query_for(STATUS_IN_PROGRESS);
    let taken_over = query_for(STATUS_TAKEOVER);

    let (in_progress, taken_over) = futures::future::try_join(
        api.list_conversations(&in_progress),
        api.list_conversations(&taken_over),
    )
    .await?;

    Ok(ActiveConversations::from_records(
        in_progress.iter().chain(taken_over.iter()),
    ))
}

/// Background worker publishing the active conversation list.
pub struct ActiveConversationPoller {
    api: Arc<dyn ConversationApi>,
    config: PollerConfig,
    range: DateRange,
    snapshot: watch::Sender<ActiveConversations>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl ActiveConversationPoller {
    /// Create a poller; nothing runs until [`Self::spawn`].
    #[must_use]
    pub fn new(api: Arc<dyn ConversationApi>, config: PollerConfig) -> Self {
        let (snapshot, _) = watch::channel(ActiveConversations::default());
        Self {
            api,
            config,
            range: DateRange::default(),
            snapshot,
            wake: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Restrict the list to a creation-date range.
    #[must_use]
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Receiver of list snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ActiveConversations> {
        self.snapshot.subscribe()
    }

    /// Handle that triggers an immediate refresh.
    #[must_use]
    pub fn refresh_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Get a shutdown notifier to stop the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Refresh once and publish the result.
    ///
    /// A failed fetch publishes an empty list.
    pub async fn poll_once(&self) -> ActiveConversations {
        let list = match fetch_active(self.api.as_ref(), &self.config, &self.range).await {
            Ok(list) => {
                debug!(total = list.total, "Active conversations refreshed");
                list
            }
            Err(err) => {
                warn!(?err, "Failed to fetch active conversations");
                ActiveConversations::default()
            }
        };
        self.snapshot.send_replace(list.clone());
        list
    }

    /// Spawn the refresh loop as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Active conversation poller is disabled");
            return;
        }

        let interval = self.config.interval;
        info!(?interval, "Starting active conversation poller");

        loop {
            self.poll_once().await;
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = self.wake.notified() => {
                    debug!("Active conversation refresh requested");
                }
                () = self.shutdown.notified() => {
                    info!("Active conversation poller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::BackendError;
    use crate::backend::client::ApiFuture;
    use crate::backend::records::{ConversationKind, ConversationRecord};
    use crate::live::entry::TranscriptEntry;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ListOnlyApi {
        fail: bool,
        queries: Mutex<Vec<ConversationQuery>>,
    }

    impl ConversationApi for ListOnlyApi {
        fn list_conversations<'a>(
            &'a self,
            query: &'a ConversationQuery,
        ) -> ApiFuture<'a, BackendResult<Vec<ConversationRecord>>> {
            if let Ok(mut queries) = self.queries.lock() {
                queries.push(query.clone());
            }
            let fail = self.fail;
            let status = query.conversation_status.clone();
            Box::pin(async move {
                if fail {
                    return Err(BackendError::Status {
                        status: 500,
                        message: "boom".to_string(),
                    });
                }
                let recording = if status == "in_progress" {
                    serde_json::json!({"file_path": "a.wav"})
                } else {
                    serde_json::Value::Null
                };
                let record: ConversationRecord = serde_json::from_value(serde_json::json!({
                    "id": format!("{status}-1"),
                    "status": status,
                    "recording": recording,
                }))?;
                let stale: ConversationRecord = serde_json::from_value(serde_json::json!({
                    "id": "old",
                    "status": "finalized",
                }))?;
                Ok(vec![record, stale])
            })
        }

        fn fetch_conversation<'a>(
            &'a self,
            _id: &'a str,
        ) -> ApiFuture<'a, BackendResult<ConversationRecord>> {
            Box::pin(async { Ok(ConversationRecord::default()) })
        }

        fn takeover<'a>(&'a self, _id: &'a str) -> ApiFuture<'a, bool> {
            Box::pin(async { false })
        }

        fn append_messages<'a>(
            &'a self,
            _id: &'a str,
            _messages: &'a [TranscriptEntry],
            _analyst_id: &'a str,
        ) -> ApiFuture<'a, BackendResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn finalize<'a>(
            &'a self,
            _id: &'a str,
            _analyst_id: &'a str,
        ) -> ApiFuture<'a, BackendResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_fetch_active_merges_both_statuses() {
        let api = ListOnlyApi::default();
        let range = DateRange {
            from_date: Some("2024-01-01".to_string()),
            to_date: None,
        };
        let list = fetch_active(&api, &PollerConfig::default(), &range)
            .await
            .unwrap_or_default();

        assert_eq!(list.total, 2);
        assert_eq!(list.conversations[0].id, "in_progress-1");
        assert_eq!(list.conversations[0].kind, ConversationKind::Call);
        assert_eq!(list.conversations[1].id, "takeover-1");
        assert_eq!(list.conversations[1].kind, ConversationKind::Chat);

        let queries = api.queries.lock().map(|q| q.clone()).unwrap_or_default();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.limit == 50 && q.minimum_hostility_score == 10));
        assert!(queries.iter().all(|q| q.from_date.as_deref() == Some("2024-01-01")));
    }

    #[tokio::test]
    async fn test_failed_poll_publishes_empty_list() {
        let api = Arc::new(ListOnlyApi {
            fail: true,
            ..ListOnlyApi::default()
        });
        let poller = ActiveConversationPoller::new(api, PollerConfig::default());
        let receiver = poller.subscribe();
        let list = poller.poll_once().await;
        assert_eq!(list, ActiveConversations::default());
        assert_eq!(*receiver.borrow(), ActiveConversations::default());
    }

    #[tokio::test]
    async fn test_refresh_handle_wakes_loop() {
        let api = Arc::new(ListOnlyApi::default());
        let config = PollerConfig {
            interval: Duration::from_secs(3600),
            ..PollerConfig::default()
        };
        let poller = ActiveConversationPoller::new(api.clone(), config);
        let mut receiver = poller.subscribe();
        let wake = poller.refresh_handle();
        let shutdown = poller.shutdown_notifier();
        let handle = poller.spawn();

        assert!(receiver.changed().await.is_ok());
        wake.notify_one();
        assert!(
            tokio::time::timeout(Duration::from_secs(2), receiver.changed())
                .await
                .is_ok()
        );
        let calls = api.queries.lock().map(|q| q.len()).unwrap_or_default();
        assert_eq!(calls, 4);

        shutdown.notify_one();
        assert!(handle.await.is_ok());
    }
}
