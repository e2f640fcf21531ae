//! Sync client: a cached board view kept current by the live event feed.
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `session`   | `ClientSession`: this process's client id and headers     |
//! | `api`       | `KanbanApi` trait + `HttpKanbanApi` (reqwest)             |
//! | `cache`     | `QueryCache` keyed by `(projectId, boardId)`, snapshots   |
//! | `reconcile` | `Reconciler`: applies events, suppresses own echoes       |
//! | `reorder`   | `ReorderController`: optimistic drag with rollback        |
//! | `sync`      | `SyncClient`: WebSocket consumer with reconnect           |

pub mod api;
pub mod cache;
pub mod reconcile;
pub mod reorder;
pub mod session;
pub mod sync;

pub use api::{HttpKanbanApi, KanbanApi};
pub use cache::{BoardKey, QueryCache, SharedCache, ViewState};
pub use reconcile::{ApplyOutcome, Reconciler};
pub use reorder::ReorderController;
pub use session::ClientSession;
pub use sync::SyncClient;
