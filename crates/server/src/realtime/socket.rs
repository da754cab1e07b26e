//! Live-connection endpoint
//!
//! Each WebSocket is authenticated at upgrade time, gets an ephemeral
//! connection id, and then runs an event loop: `join` subscribes the
//! connection to a conversation room (membership-checked), `message:send`
//! persists then fans out, typing events pass through unpersisted.
//! Disconnecting drops every subscription.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{should_deliver, ClientEvent, ConnId, RoomEvent, ServerEvent};
use crate::config::AppState;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// GET /ws?token=...
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let token = params
        .token
        .ok_or_else(|| Error::Unauthorized("Missing token".to_string()))?;
    let claims = state.auth.verify_token(&token)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims.user_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let conn_id: ConnId = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound events funnel through one writer task so room forwarders
    // never contend for the socket.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // room id -> forwarder task draining that room's broadcast channel
    let mut joined: HashMap<String, JoinHandle<()>> = HashMap::new();

    info!("Connection {} opened (user {})", conn_id, user_id);

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                debug!("Connection {} socket error: {}", conn_id, e);
                break;
            }
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let event = match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                debug!("Connection {} sent a bad frame: {}", conn_id, e);
                let _ = out_tx.send(ServerEvent::Error {
                    message: "Unrecognized event".to_string(),
                });
                continue;
            }
        };

        match event {
            ClientEvent::Join(room_id) => {
                if joined.contains_key(&room_id) {
                    continue;
                }

                match state.directory.is_member(&user_id, &room_id).await {
                    Ok(true) => {
                        let handle =
                            spawn_forwarder(&state, &room_id, conn_id, out_tx.clone()).await;
                        joined.insert(room_id.clone(), handle);
                        info!("Connection {} joined room {}", conn_id, room_id);
                    }
                    Ok(false) => {
                        let _ = out_tx.send(ServerEvent::Error {
                            message: "Not a member of this conversation".to_string(),
                        });
                    }
                    Err(e) => {
                        warn!("Membership check for room {} failed: {}", room_id, e);
                        let _ = out_tx.send(ServerEvent::Error {
                            message: "Join failed".to_string(),
                        });
                    }
                }
            }

            ClientEvent::MessageSend {
                conversation_id,
                text,
                sender_id,
            } => {
                // The authenticated user is the sender of record.
                if let Some(claimed) = sender_id {
                    if claimed != user_id {
                        warn!(
                            "Connection {} sent senderId {} but is user {}; ignoring field",
                            conn_id, claimed, user_id
                        );
                    }
                }

                match state.store.append(&user_id, &conversation_id, &text).await {
                    Ok(message) => {
                        let delivered = state
                            .rooms
                            .broadcast(
                                &conversation_id,
                                RoomEvent {
                                    origin: conn_id,
                                    event: ServerEvent::MessageNew { message },
                                },
                            )
                            .await;
                        debug!(
                            "message:new fanned out to {} subscribers of {}",
                            delivered, conversation_id
                        );
                    }
                    Err(e) => {
                        warn!("Failed to persist message: {}", e);
                        let _ = out_tx.send(ServerEvent::Error {
                            message: "Failed to send message".to_string(),
                        });
                    }
                }
            }

            ClientEvent::TypingStart {
                conversation_id,
                user_id: typist,
            } => {
                state
                    .rooms
                    .broadcast(
                        &conversation_id,
                        RoomEvent {
                            origin: conn_id,
                            event: ServerEvent::TypingStart {
                                conversation_id: conversation_id.clone(),
                                user_id: typist,
                            },
                        },
                    )
                    .await;
            }

            ClientEvent::TypingStop {
                conversation_id,
                user_id: typist,
            } => {
                state
                    .rooms
                    .broadcast(
                        &conversation_id,
                        RoomEvent {
                            origin: conn_id,
                            event: ServerEvent::TypingStop {
                                conversation_id: conversation_id.clone(),
                                user_id: typist,
                            },
                        },
                    )
                    .await;
            }
        }
    }

    // Implicit unsubscribe from every joined room.
    for (room_id, handle) in joined {
        handle.abort();
        debug!("Connection {} left room {}", conn_id, room_id);
    }
    writer.abort();

    info!("Connection {} closed", conn_id);
}

/// Drain a room's broadcast channel into this connection's outbound queue.
/// A lagged receiver skips what it missed; delivery is at-most-once.
async fn spawn_forwarder(
    state: &AppState,
    room_id: &str,
    conn_id: ConnId,
    out_tx: mpsc::UnboundedSender<ServerEvent>,
) -> JoinHandle<()> {
    let mut room_rx = state.rooms.subscribe(room_id).await;

    tokio::spawn(async move {
        loop {
            match room_rx.recv().await {
                Ok(update) => {
                    if !should_deliver(&update, conn_id) {
                        continue;
                    }
                    if out_tx.send(update.event).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Connection {} lagged, skipped {} events", conn_id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
