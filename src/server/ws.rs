use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use taskboard_common::{ClientId, KanbanEvent, SubscriptionScope, Tracked};
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::subscription::KanbanSubscription;
use crate::errors::BoardError;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeQuery {
    /// Recipient id echoed back in every envelope. Generated when absent.
    pub client_id: Option<ClientId>,
}

// ── WebSocket handler ────────────────────────────────────────────────

/// `subscribeKanban`: one filtered event feed per socket.
pub async fn subscribe_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path((team_id, project_id)): Path<(String, String)>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Response, ApiError> {
    let lookup_team = team_id.clone();
    let lookup_project = project_id.clone();
    state
        .db
        .call(move |db| match db.get_project(&lookup_project)? {
            Some(project) if project.team_id == lookup_team => Ok(()),
            _ => Err(BoardError::ProjectNotFound { id: lookup_project }.into()),
        })
        .await?;

    let scope = SubscriptionScope::new(team_id, project_id);
    let recipient = query.client_id.unwrap_or_else(ClientId::generate);
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, scope, recipient))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: SharedState,
    scope: SubscriptionScope,
    recipient: ClientId,
) {
    let cancel = state.shutdown.child_token();
    let subscription = KanbanSubscription::new(&state.broker, scope, recipient, cancel.clone());
    tracing::info!(
        client_id = %recipient,
        team_id = %subscription.scope().team_id,
        project_id = %subscription.scope().project_id,
        "Subscriber connected"
    );

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription).await;

    // Releases the broker receiver even if the loop ended on a socket error.
    cancel.cancel();
    tracing::info!(client_id = %recipient, "Subscriber disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines subscription forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits. The loop also exits when the
/// subscription ends (cancelled, lagged, or broker closed).
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: KanbanSubscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(client_id = %subscription.recipient(), "Pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Subscription forwarding ─────────────────────────────
            next = subscription.next_event() => {
                let Some(tracked) = next else { break };
                let Some(frame) = encode_frame(&tracked) else { continue };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Feed is server-to-client only
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

fn encode_frame(tracked: &Tracked<KanbanEvent>) -> Option<String> {
    match serde_json::to_string(tracked) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(
                event_type = tracked.data.event_type(),
                error = %e,
                "Failed to serialize kanban event"
            );
            None
        }
    }
}
