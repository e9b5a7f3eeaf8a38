//! WebSocket handler — the transport edge of the fan-out.
//!
//! Flow per connection:
//! 1. Accept WS upgrade, assign a fresh session id
//! 2. Spawn the writer task draining the session's outbound channel
//! 3. Message loop: identify / legacy join / generic notification /
//!    diagnostic queries
//! 4. On disconnect/drop: hub cleanup + `update-clients` to everyone

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatch::{dispatch, AlertEvent};
use crate::error::AlertError;
use crate::rooms::SessionTx;
use crate::state::{AppState, SessionHandle};
use crate::types::{ClientMessage, NotificationKind, ServerMessage, SessionId};

/// Axum handler for GET /ws — upgrades to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state machine.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = SessionId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.session_buffer);

    state
        .connections
        .insert(session, SessionHandle { tx: tx.clone() });
    info!(session_id = %session, "client connected");

    // Writer task: serialize outbound frames. Ends when every sender
    // clone (connections map, room membership, this loop) is gone.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    warn!("serialize error: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // ── Message loop ────────────────────────────────────────
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_client_message(&text, session, &tx, &state) {
                    warn!(session_id = %session, "message error: {e}");
                    let _ = tx.try_send(ServerMessage::Error {
                        code: "message_error".into(),
                        message: e.to_string(),
                    });
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) => { /* axum auto-pongs */ }
            Ok(_) => { /* binary frames ignored */ }
            Err(e) => {
                warn!(session_id = %session, "ws recv error: {e}");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────
    state.hub.disconnect(session);
    state.connections.remove(&session);
    drop(tx);
    let _ = writer.await;

    info!(session_id = %session, "client disconnected");
    let snapshot = state.client_snapshot();
    state.broadcast_all(ServerMessage::UpdateClients { clients: snapshot });
}

/// Route one parsed client event. Synchronous: every operation here is
/// an in-memory enqueue, so a slow peer never stalls the loop.
fn handle_client_message(
    text: &str,
    session: SessionId,
    tx: &SessionTx,
    state: &Arc<AppState>,
) -> Result<(), AlertError> {
    let msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| AlertError::Protocol(format!("invalid JSON: {e}")))?;

    match msg {
        ClientMessage::Identify {
            user_id,
            vecindario_id,
        } => {
            info!(session_id = %session, user_id = %user_id, vecindario_id = %vecindario_id,
                  "identify");
            state
                .hub
                .identify(session, tx.clone(), user_id, vecindario_id);
        }
        ClientMessage::JoinRoomLegacy { vecindario_id } => {
            info!(session_id = %session, vecindario_id = %vecindario_id, "legacy join");
            state.hub.join_legacy(session, tx.clone(), vecindario_id);
        }
        ClientMessage::SendGenericNotification {
            sala,
            mensaje,
            tipo,
            emisor,
        } => {
            let kind = tipo
                .as_deref()
                .map(NotificationKind::parse)
                .unwrap_or(NotificationKind::Info);
            let event = AlertEvent::Notice {
                neighborhood: sala,
                emitter: emisor.unwrap_or_else(|| "Usuario".into()),
                mensaje,
                kind,
            };
            // Alarm-typed notices are refused by the dispatcher; the
            // business transaction (none here) is unaffected either way.
            if let Err(e) = dispatch(&state.hub, event) {
                warn!(session_id = %session, "notice dropped: {e}");
            }
        }
        ClientMessage::GetClients => {
            let _ = tx.try_send(ServerMessage::UpdateClients {
                clients: state.client_snapshot(),
            });
        }
        ClientMessage::GetRoomMembers { vecindario_id } => {
            let members = state.hub.members_of(&vecindario_id);
            let _ = tx.try_send(ServerMessage::RoomMembers {
                vecindario_id,
                members,
            });
        }
    }
    Ok(())
}
