use std::sync::Arc;

use taskboard_common::KanbanEvent;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber before it lags.
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared topic carrying every kanban mutation event.
///
/// The broker does not scope by team or project; events describe their own
/// scope and each subscription filters. Publishing is fire-and-forget.
#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<Arc<KanbanEvent>>,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push one event onto the topic. Never fails from the caller's view:
    /// the mutation it describes is already committed.
    pub fn publish(&self, event: KanbanEvent) {
        let event_type = event.event_type();
        let board_id = event.board_id().to_string();
        match self.tx.send(Arc::new(event)) {
            Ok(receivers) => {
                tracing::debug!(event_type, board_id = %board_id, receivers, "Published kanban event");
            }
            Err(_) => {
                tracing::debug!(event_type, board_id = %board_id, "No live subscribers for kanban event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<KanbanEvent>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
