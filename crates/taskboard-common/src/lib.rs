//! Shared domain types for the taskboard server and its sync clients.
//!
//! Everything that crosses the wire lives here so the publishing side and the
//! reconciling side agree on one definition: the board entities, the mutation
//! inputs, the kanban event union, and the per-session client identifier.

pub mod client_id;
pub mod event;
pub mod input;
pub mod model;

pub use client_id::{CLIENT_ID_HEADER, ClientId};
pub use event::{IncomingEvent, KanbanEvent, SubscriptionScope, Tracked};
pub use input::{CreateColumnInput, CreateTaskInput, UpdateColumnInput, UpdateTaskInput};
pub use model::{Board, ColumnWithTasks, KanbanColumn, Priority, Project, Task, Team};
