//! Live board view: `taskboard watch`.
//!
//! Loads one board, subscribes to its project and reprints the board every
//! time an event changes the cached view.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use taskboard::client::cache::{self, shared};
use taskboard::client::{
    ApplyOutcome, BoardKey, ClientSession, HttpKanbanApi, QueryCache, Reconciler, SyncClient,
};
use taskboard::config::TaskboardConfig;
use taskboard_common::{ColumnWithTasks, IncomingEvent, SubscriptionScope};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct WatchArgs {
    pub team: String,
    pub project: String,
    pub board: String,
    pub server: Option<String>,
}

pub async fn cmd_watch(config: &TaskboardConfig, args: WatchArgs) -> Result<()> {
    let server_url = args
        .server
        .unwrap_or_else(|| config.client.server_url.clone());
    let session = ClientSession::new();
    let api = HttpKanbanApi::new(&server_url, session)
        .with_context(|| format!("Invalid server URL: {}", server_url))?;
    let scope = SubscriptionScope::new(args.team, args.project.clone());
    let ws_url = api.subscribe_url(&scope)?;
    let key = BoardKey::new(args.project, args.board);

    let cache = shared(QueryCache::new());
    let reconciler = Reconciler::new(session, scope, cache.clone());
    let sync = SyncClient::new(
        Arc::new(api),
        reconciler,
        ws_url.to_string(),
        config.client.reconnect_delay(),
    );

    sync.load_board(&key)
        .await
        .with_context(|| format!("Failed to load board {}", key.board_id))?;
    print_board(&cache, &key);

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    });

    sync.run(cancel, |tracked, outcome| {
        let event_type = match &tracked.data {
            IncomingEvent::Known(event) => event.event_type(),
            IncomingEvent::Unrecognized { .. } => "unrecognized",
        };
        tracing::debug!(event_type, ?outcome, "Event received");
        if matches!(outcome, ApplyOutcome::Applied | ApplyOutcome::Invalidated) {
            println!("-- {} --", event_type);
            print_board(&cache, &key);
        }
    })
    .await;

    Ok(())
}

fn print_board(cache: &taskboard::client::SharedCache, key: &BoardKey) {
    let guard = cache::lock(cache);
    match guard.columns(key) {
        Some(columns) => print!("{}", render_board(columns)),
        None => println!("(board {} not loaded)", key.board_id),
    }
}

/// Plain-text rendering: one header per column, one indented line per task.
pub fn render_board(columns: &[ColumnWithTasks]) -> String {
    let mut out = String::new();
    for column in columns {
        let _ = writeln!(
            out,
            "[{}] {} ({})",
            column.column.order,
            column.column.name,
            column.tasks.len()
        );
        for task in &column.tasks {
            let _ = writeln!(out, "    {}. #{} {}", task.order, task.id, task.title);
        }
    }
    if columns.is_empty() {
        out.push_str("(no columns)\n");
    }
    out
}
