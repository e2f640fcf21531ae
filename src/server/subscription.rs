//! Per-connection view of the broker, filtered to one team and project.

use std::sync::Arc;

use futures::Stream;
use taskboard_common::{ClientId, KanbanEvent, SubscriptionScope, Tracked};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::broker::Broker;

pub struct KanbanSubscription {
    rx: broadcast::Receiver<Arc<KanbanEvent>>,
    scope: SubscriptionScope,
    recipient: ClientId,
    cancel: CancellationToken,
}

impl KanbanSubscription {
    /// Subscribe now; events published before this call are not seen.
    pub fn new(
        broker: &Broker,
        scope: SubscriptionScope,
        recipient: ClientId,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx: broker.subscribe(),
            scope,
            recipient,
            cancel,
        }
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    pub fn recipient(&self) -> ClientId {
        self.recipient
    }

    /// Next in-scope event wrapped for this recipient.
    ///
    /// Returns `None` once cancelled, once the broker is gone, or after the
    /// receiver lagged. A lagged feed has lost events, so it ends and lets
    /// the client resubscribe and revalidate.
    pub async fn next_event(&mut self) -> Option<Tracked<KanbanEvent>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                received = self.rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    if !event.matches_scope(&self.scope) {
                        continue;
                    }
                    return Some(Tracked {
                        id: self.recipient,
                        data: (*event).clone(),
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        client_id = %self.recipient,
                        skipped,
                        "Subscriber lagged behind broker, ending feed"
                    );
                    return None;
                }
                Err(RecvError::Closed) => {
                    tracing::debug!(client_id = %self.recipient, "Broker closed");
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Tracked<KanbanEvent>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next_event().await?;
            Some((event, sub))
        })
    }
}
