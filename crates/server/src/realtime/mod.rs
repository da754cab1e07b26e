//! Realtime Room Broker
//!
//! Maps live connections onto conversation rooms and fans events out to
//! every current subscriber. One broadcast channel per room, created on
//! first subscribe; delivery is best-effort and at-most-once per
//! connection, with no replay for late joiners.

pub mod socket;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::models::Message;

pub use socket::ws_handler;

/// Ephemeral identifier for a live connection; not a durable entity.
pub type ConnId = Uuid;

/// Events sent to clients over the live channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew { message: Message },
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { message: String },
}

/// Events received from clients over the live channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Subscribe to a conversation's room; payload is the conversation id.
    #[serde(rename = "join")]
    Join(String),
    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        conversation_id: String,
        text: String,
        #[serde(default)]
        sender_id: Option<String>,
    },
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop {
        conversation_id: String,
        user_id: String,
    },
}

/// A server event tagged with the connection that caused it, so typing
/// indicators can skip their own sender.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub origin: ConnId,
    pub event: ServerEvent,
}

/// Typing events are not echoed back to the connection that sent them;
/// `message:new` goes to everyone in the room, the sender included.
pub fn should_deliver(update: &RoomEvent, conn_id: ConnId) -> bool {
    match update.event {
        ServerEvent::TypingStart { .. } | ServerEvent::TypingStop { .. } => {
            update.origin != conn_id
        }
        _ => true,
    }
}

/// Room-id to broadcast-channel registry, the single mutation point for
/// subscribe and fan-out.
pub struct RoomRegistry {
    channels: RwLock<HashMap<String, broadcast::Sender<RoomEvent>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a room, creating its channel on first use.
    pub async fn subscribe(&self, room_id: &str) -> broadcast::Receiver<RoomEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(room_id.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(100);
                tx
            })
            .subscribe()
    }

    /// Fan an event out to every current subscriber of a room. Returns the
    /// number of receivers the event was handed to.
    pub async fn broadcast(&self, room_id: &str, update: RoomEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(room_id) {
            Some(tx) => tx.send(update).unwrap_or(0),
            None => 0,
        }
    }

    /// Current subscriber count for a room.
    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(room_id).map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
