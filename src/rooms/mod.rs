//! Room registry for realtime connections
//!
//! Authenticated connections are grouped by room id (a game session id).
//! A room exists while it has members: it is created by the first
//! registration and pruned when its last member leaves.
//!
//! Broadcasting never awaits. Each connection owns a bounded outbound
//! queue; a full queue drops the message for that connection only, and a
//! connection that keeps overflowing is evicted. Evicting a member drops
//! the registry's sender, which closes the queue and lets the connection's
//! writer task shut the socket.

pub mod protocol;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::directory::Role;

pub use protocol::{ClientMessage, ServerMessage};

pub type ConnectionId = Uuid;

/// Lifecycle of a realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingAuth,
    Authenticated,
    Closed,
}

/// The registry's view of an authenticated connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub sender: mpsc::Sender<Utf8Bytes>,
}

/// Delivery summary for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: usize,
}

struct Member {
    handle: ConnectionHandle,
    /// Consecutive messages dropped on a full queue
    dropped: u32,
}

#[derive(Default)]
struct Room {
    members: Mutex<HashMap<ConnectionId, Member>>,
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    slow_consumer_limit: u32,
}

impl RoomRegistry {
    pub fn new(slow_consumer_limit: u32) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            slow_consumer_limit: slow_consumer_limit.max(1),
        }
    }

    /// Add a connection to a room, creating the room if needed
    pub fn register(&self, room_id: &str, handle: ConnectionHandle) {
        let id = handle.id;
        let member = Member { handle, dropped: 0 };

        // Insert under the outer lock so pruning cannot remove the room
        // between lookup and insert.
        {
            let rooms = self.rooms.read();
            if let Some(room) = rooms.get(room_id) {
                room.members.lock().insert(id, member);
                debug!(room_id, connection_id = %id, "Connection joined room");
                return;
            }
        }

        let mut rooms = self.rooms.write();
        rooms
            .entry(room_id.to_string())
            .or_default()
            .members
            .lock()
            .insert(id, member);
        debug!(room_id, connection_id = %id, "Connection joined new room");
    }

    /// Remove a connection; returns false if it was not registered
    pub fn unregister(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        let (removed, now_empty) = {
            let rooms = self.rooms.read();
            let Some(room) = rooms.get(room_id) else {
                return false;
            };
            let mut members = room.members.lock();
            let removed = members.remove(&connection_id).is_some();
            (removed, members.is_empty())
        };

        if now_empty {
            self.prune(room_id);
        }
        if removed {
            debug!(room_id, connection_id = %connection_id, "Connection left room");
        }
        removed
    }

    /// Serialize once and fan out to every member of the room
    pub fn broadcast<T: Serialize>(&self, room_id: &str, message: &T) -> BroadcastReport {
        match serde_json::to_string(message) {
            Ok(json) => self.broadcast_text(room_id, Utf8Bytes::from(json)),
            Err(e) => {
                warn!(room_id, error = %e, "Failed to serialize broadcast");
                BroadcastReport::default()
            }
        }
    }

    /// Fan out an already serialized frame to every member of the room
    pub fn broadcast_text(&self, room_id: &str, text: Utf8Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let now_empty = {
            let rooms = self.rooms.read();
            let Some(room) = rooms.get(room_id) else {
                return report;
            };
            let mut members = room.members.lock();
            let limit = self.slow_consumer_limit;

            members.retain(|id, member| match member.handle.sender.try_send(text.clone()) {
                Ok(()) => {
                    member.dropped = 0;
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    member.dropped += 1;
                    report.dropped += 1;
                    if member.dropped >= limit {
                        warn!(
                            room_id,
                            connection_id = %id,
                            username = %member.handle.username,
                            dropped = member.dropped,
                            "Evicting slow connection"
                        );
                        report.evicted += 1;
                        false
                    } else {
                        true
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(room_id, connection_id = %id, "Dropping closed connection");
                    report.evicted += 1;
                    false
                }
            });
            members.is_empty()
        };

        if now_empty {
            self.prune(room_id);
        }
        report
    }

    /// Remove a room if it has no members left
    fn prune(&self, room_id: &str) {
        let mut rooms = self.rooms.write();
        let empty = rooms
            .get(room_id)
            .is_some_and(|room| room.members.lock().is_empty());
        if empty {
            rooms.remove(room_id);
            debug!(room_id, "Pruned empty room");
        }
    }

    /// Number of connections in a room
    pub fn connection_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .get(room_id)
            .map_or(0, |room| room.members.lock().len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}
