//! Subscription consumer: keeps one reconciler fed across reconnects.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use taskboard_common::{IncomingEvent, Tracked};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::api::KanbanApi;
use super::cache::{self, BoardKey, SharedCache};
use super::reconcile::{ApplyOutcome, Reconciler};
use crate::errors::SyncError;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Re-fetch every stale board and board list. Boards with a reorder in
/// flight are left stale for the next pass. Returns how many entries were
/// refreshed.
pub async fn refresh_stale(api: &dyn KanbanApi, cache: &SharedCache) -> Result<usize, SyncError> {
    let (boards, lists) = {
        let cache = cache::lock(cache);
        (cache.stale_boards(), cache.stale_board_lists())
    };

    let mut refreshed = 0;
    for key in boards {
        let columns = api.board_columns(&key.board_id).await?;
        let mut cache = cache::lock(cache);
        if cache.view_state(&key).is_some_and(|v| !v.is_at_rest()) {
            continue;
        }
        cache.set_columns(key, columns);
        refreshed += 1;
    }
    for project_id in lists {
        let boards = api.list_boards(&project_id).await?;
        cache::lock(cache).set_boards(project_id, boards);
        refreshed += 1;
    }
    Ok(refreshed)
}

pub struct SyncClient {
    api: Arc<dyn KanbanApi>,
    reconciler: Reconciler,
    subscribe_url: String,
    reconnect_delay: Duration,
}

impl SyncClient {
    pub fn new(
        api: Arc<dyn KanbanApi>,
        reconciler: Reconciler,
        subscribe_url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            api,
            reconciler,
            subscribe_url: subscribe_url.into(),
            reconnect_delay,
        }
    }

    pub fn cache(&self) -> &SharedCache {
        self.reconciler.cache()
    }

    /// Fetch a board into the cache so events for it get applied.
    pub async fn load_board(&self, key: &BoardKey) -> Result<(), SyncError> {
        let columns = self.api.board_columns(&key.board_id).await?;
        cache::lock(self.cache()).set_columns(key.clone(), columns);
        Ok(())
    }

    pub async fn refresh_stale(&self) -> Result<usize, SyncError> {
        refresh_stale(self.api.as_ref(), self.cache()).await
    }

    /// Apply one raw text frame. Frames that are not tracked envelopes are
    /// logged and dropped.
    pub fn handle_frame(&self, text: &str) -> Option<(Tracked<IncomingEvent>, ApplyOutcome)> {
        match serde_json::from_str::<Tracked<IncomingEvent>>(text) {
            Ok(tracked) => {
                let outcome = self.reconciler.apply(&tracked);
                Some((tracked, outcome))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed subscription frame");
                None
            }
        }
    }

    /// Subscribe and keep resubscribing until `cancel` fires.
    ///
    /// Every (re)connection invalidates the subscribed project and re-fetches
    /// stale entries, since events sent while disconnected are gone.
    /// `on_event` runs after each applied frame.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_event: F)
    where
        F: FnMut(&Tracked<IncomingEvent>, &ApplyOutcome),
    {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.session_once(&cancel, &mut on_event).await {
                Ok(()) => tracing::info!("Subscription ended"),
                Err(e) => tracing::warn!(error = %e, "Subscription failed"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    tracing::info!(url = %self.subscribe_url, "Reconnecting");
                }
            }
        }
    }

    async fn session_once<F>(
        &self,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<(), SyncError>
    where
        F: FnMut(&Tracked<IncomingEvent>, &ApplyOutcome),
    {
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.subscribe_url.as_str()) => connected,
        };
        let (mut stream, _response) = connected.map_err(|e| SyncError::WebSocket(Box::new(e)))?;
        tracing::info!(
            team_id = %self.reconciler.scope().team_id,
            project_id = %self.reconciler.scope().project_id,
            "Subscribed"
        );

        self.reconciler.on_resubscribe();
        if let Err(e) = self.refresh_stale().await {
            tracing::warn!(error = %e, "Failed to refresh after subscribing");
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(());
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    if let Some((tracked, outcome)) = self.handle_frame(text.as_str()) {
                        if outcome == ApplyOutcome::Invalidated {
                            if let Err(e) = self.refresh_stale().await {
                                tracing::warn!(error = %e, "Failed to refresh invalidated entries");
                            }
                        }
                        on_event(&tracked, &outcome);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {
                    // Ping/Pong are answered by tungstenite
                }
                Some(Err(e)) => return Err(SyncError::WebSocket(Box::new(e))),
            }
        }
    }
}
