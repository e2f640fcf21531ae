//! Taskboard server: persistence, HTTP mutations and the live event feed.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  app.rs  (Router, ServerConfig, graceful stop)   │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │ mutation committed in db.rs           │
//!                       │         v                                        │
//!                       │  broker.rs  (Broker::publish, one shared topic)  │
//!                       │         │ fan-out to every receiver              │
//!                       │         v                                        │
//!                       │  subscription.rs  (scope filter, Tracked wrap)   │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  ws.rs  (socket loop, ping/pong keepalive)       │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Typical Request Flow (drag a task to another column)
//!
//! 1. `PATCH /api/tasks/{id}` with `x-client-id` → `api::update_task()`
//! 2. `db.rs` writes the new column and order inside one transaction
//! 3. The handler publishes `task_updated` carrying the origin client id
//! 4. Every `KanbanSubscription` scoped to the task's team and project wraps
//!    the event in a `Tracked` envelope for its own recipient
//! 5. `ws.rs` writes the envelope as a JSON text frame

pub mod api;
pub mod app;
pub mod broker;
pub mod db;
pub mod subscription;
pub mod ws;

pub use api::{AppState, SharedState};
pub use app::{ServerConfig, build_router, start_server};
pub use broker::Broker;
pub use db::{BoardDb, DbHandle};
