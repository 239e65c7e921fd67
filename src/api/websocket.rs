//! WebSocket handler for realtime combat rooms
//!
//! Handshake: the server sends `auth_required`, the client answers with
//! `{type:"auth", token, room}` inside the handshake window. Any failure
//! sends one `error` frame and closes. On success the connection joins the
//! room and a writer task drains its outbound queue into the socket.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError, WeakSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::directory::Identity;
use crate::rooms::{ClientMessage, ConnectionHandle, ConnectionId, ConnectionState, ServerMessage};

const INVALID_AUTH: &str = "Invalid authentication message";
const INVALID_TOKEN: &str = "Invalid token";
const ROOM_REQUIRED: &str = "Room ID required";

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub room: Option<String>,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.room))
}

/// An authenticated member of a room
struct RoomMember {
    id: ConnectionId,
    identity: Identity,
    room_id: String,
}

enum HandshakeFailure {
    /// Peer went away; nothing to send
    Disconnected,
    Rejected(&'static str),
}

enum FirstFrame {
    Text(Utf8Bytes),
    Unexpected,
    Closed,
}

fn transition(id: ConnectionId, state: &mut ConnectionState, next: ConnectionState) {
    debug!(connection_id = %id, from = ?state, to = ?next, "Connection state change");
    *state = next;
}

/// Handle an individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: AppState, query_room: Option<String>) {
    let id = Uuid::new_v4();
    let mut lifecycle = ConnectionState::Connecting;

    if send_direct(&mut socket, &ServerMessage::AuthRequired).await.is_err() {
        return;
    }
    transition(id, &mut lifecycle, ConnectionState::AwaitingAuth);

    let (identity, room_id) = match authenticate(&mut socket, &state, query_room).await {
        Ok(authenticated) => authenticated,
        Err(HandshakeFailure::Disconnected) => {
            transition(id, &mut lifecycle, ConnectionState::Closed);
            return;
        }
        Err(HandshakeFailure::Rejected(reason)) => {
            debug!(connection_id = %id, reason, "Handshake rejected");
            let _ = send_direct(&mut socket, &ServerMessage::error(reason)).await;
            let _ = socket.send(Message::Close(None)).await;
            transition(id, &mut lifecycle, ConnectionState::Closed);
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<Utf8Bytes>(state.realtime.outbound_queue.max(1));
    let outbound = tx.downgrade();

    // Queued before joining so it precedes any room broadcast
    let welcome = ServerMessage::AuthSuccess {
        username: identity.username.clone(),
        role: identity.role,
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = tx.try_send(Utf8Bytes::from(json));
    }

    state.rooms.register(
        &room_id,
        ConnectionHandle {
            id,
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            role: identity.role,
            sender: tx,
        },
    );
    transition(id, &mut lifecycle, ConnectionState::Authenticated);
    info!(connection_id = %id, username = %identity.username, room_id = %room_id, "WebSocket joined room");

    let session = RoomMember {
        id,
        identity,
        room_id,
    };

    let (mut sink, mut stream) = socket.split();

    // The registry holds the only strong sender, so eviction ends this task
    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !handle_client_text(&state, &session, &outbound, text.as_str()) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    state.rooms.unregister(&session.room_id, session.id);
    writer.abort();
    transition(session.id, &mut lifecycle, ConnectionState::Closed);
    info!(connection_id = %session.id, room_id = %session.room_id, "WebSocket disconnected");
}

/// Wait for the auth message and verify it
async fn authenticate(
    socket: &mut WebSocket,
    state: &AppState,
    query_room: Option<String>,
) -> Result<(Identity, String), HandshakeFailure> {
    let window = Duration::from_millis(state.realtime.handshake_timeout_ms);
    let text = match tokio::time::timeout(window, first_frame(socket)).await {
        Err(_) => return Err(HandshakeFailure::Rejected(INVALID_AUTH)),
        Ok(FirstFrame::Text(text)) => text,
        Ok(FirstFrame::Unexpected) => return Err(HandshakeFailure::Rejected(INVALID_AUTH)),
        Ok(FirstFrame::Closed) => return Err(HandshakeFailure::Disconnected),
    };

    let Ok(ClientMessage::Auth { token, room }) = serde_json::from_str::<ClientMessage>(text.as_str()) else {
        return Err(HandshakeFailure::Rejected(INVALID_AUTH));
    };

    let identity = match state.identity.verify(&token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return Err(HandshakeFailure::Rejected(INVALID_TOKEN)),
        Err(e) => {
            error!(error = %e, "Token verification failed");
            return Err(HandshakeFailure::Rejected("Internal error"));
        }
    };

    let room_id = room
        .filter(|r| !r.trim().is_empty())
        .or(query_room.filter(|r| !r.trim().is_empty()))
        .ok_or(HandshakeFailure::Rejected(ROOM_REQUIRED))?;

    Ok((identity, room_id.trim().to_string()))
}

/// Next data frame, skipping pings and pongs
async fn first_frame(socket: &mut WebSocket) -> FirstFrame {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => return FirstFrame::Text(text),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => return FirstFrame::Unexpected,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return FirstFrame::Closed,
        }
    }
}

async fn send_direct(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to serialize message");
            Ok(())
        }
    }
}

/// Handle a post-auth client frame. Returns false once the connection
/// should close.
fn handle_client_text(
    state: &AppState,
    session: &RoomMember,
    outbound: &WeakSender<Utf8Bytes>,
    text: &str,
) -> bool {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Ok(ClientMessage::Chat { message }) => {
            let message = message.trim();
            if message.is_empty() {
                ServerMessage::error("Message cannot be empty")
            } else {
                state.rooms.broadcast(
                    &session.room_id,
                    &ServerMessage::Chat {
                        room_id: session.room_id.clone(),
                        username: session.identity.username.clone(),
                        message: message.to_string(),
                        timestamp: chrono::Utc::now(),
                    },
                );
                return true;
            }
        }
        Ok(ClientMessage::Auth { .. }) => ServerMessage::error("Already authenticated"),
        Err(_) => ServerMessage::error("Unknown message type"),
    };

    // Evicted connections have no strong sender left
    let Some(sender) = outbound.upgrade() else {
        return false;
    };
    let json = match serde_json::to_string(&reply) {
        Ok(json) => json,
        Err(e) => {
            warn!(connection_id = %session.id, error = %e, "Failed to serialize reply");
            return true;
        }
    };
    match sender.try_send(Utf8Bytes::from(json)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(connection_id = %session.id, "Outbound queue full, reply dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
