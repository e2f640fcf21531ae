//! Typed error hierarchy for taskboard.
//!
//! Three top-level enums cover the three subsystems:
//! - `BoardError`: persistence and HTTP API failures on the server
//! - `SyncError`: request/response and subscription transport on the client
//! - `ReorderError`: optimistic drag-reorder failures (always rolled back)

use thiserror::Error;

/// Errors from the persistence layer and the HTTP API.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Team {id} not found")]
    TeamNotFound { id: String },

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Board {id} not found")]
    BoardNotFound { id: String },

    #[error("Column {id} not found")]
    ColumnNotFound { id: String },

    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Invalid order {order}: must be zero or greater")]
    InvalidOrder { order: i32 },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl BoardError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TeamNotFound { .. }
                | Self::ProjectNotFound { .. }
                | Self::BoardNotFound { .. }
                | Self::ColumnNotFound { .. }
                | Self::TaskNotFound { .. }
        )
    }
}

/// Errors from the client's request layer and subscription feed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode server payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Invalid server URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

/// Errors from the optimistic reorder controller.
///
/// `Persist` is only returned after the cache has been restored to its
/// pre-drag snapshot.
#[derive(Debug, Error)]
pub enum ReorderError {
    #[error("Board {board_id} is not in the local cache")]
    NotCached { board_id: String },

    #[error("A reorder is already in flight for board {board_id}")]
    InFlight { board_id: String },

    #[error("Column {id} is not on this board")]
    UnknownColumn { id: String },

    #[error("Task {id} is not on this board")]
    UnknownTask { id: i64 },

    #[error("Invalid arrangement: {0}")]
    InvalidArrangement(String),

    #[error("Failed to persist new order, local changes rolled back: {source}")]
    Persist {
        #[source]
        source: SyncError,
    },
}
