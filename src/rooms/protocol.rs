//! Realtime wire messages

use serde::{Deserialize, Serialize};

use crate::broadcast::CombatUpdate;
use crate::directory::Role;

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection
    AuthRequired,
    AuthSuccess { username: String, role: Role },
    Error { error: String },
    /// Combat state change for a room
    Combat {
        #[serde(rename = "roomId")]
        room_id: String,
        data: CombatUpdate,
    },
    Chat {
        #[serde(rename = "roomId")]
        room_id: String,
        username: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(error: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: error.into(),
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake; `room` falls back to the `?room=` query parameter
    Auth {
        token: String,
        #[serde(default)]
        room: Option<String>,
    },
    Chat { message: String },
    Ping,
}
