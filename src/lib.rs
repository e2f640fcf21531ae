//! Real-time kanban board sync.
//!
//! `server` persists boards and fans mutation events out to WebSocket
//! subscribers; `client` keeps a cached board view current from that feed
//! and runs optimistic drag-reorders with rollback.

pub mod client;
pub mod config;
pub mod errors;
pub mod logging;
pub mod server;
