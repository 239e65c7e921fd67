//! Combat update fan-out
//!
//! Every successful combat mutation becomes a [`CombatUpdate`] delivered to
//! the room named by the combat's session id. Publishing is fire-and-forget.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::combat::{ActionResult, Combat, TurnAdvance};
use crate::rooms::{BroadcastReport, RoomRegistry, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    CombatStarted,
    TurnAdvanced,
    Action,
    Damage,
    Heal,
    SavingThrow,
    CombatEnded,
}

/// Envelope carried in `{type:"combat", roomId, data}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatUpdate {
    pub kind: UpdateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combat: Option<Combat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionResult>,
    pub message: String,
}

impl CombatUpdate {
    pub fn started(combat: &Combat) -> Self {
        Self {
            kind: UpdateKind::CombatStarted,
            message: format!("Combat started with {} combatants", combat.combatants.len()),
            combat: Some(combat.clone()),
            action: None,
        }
    }

    /// A turn change, or the end of combat if nobody was left standing
    pub fn turn_advanced(advance: &TurnAdvance) -> Self {
        if advance.ended {
            return Self::ended(&advance.combat, "Combat ended: no combatants left standing");
        }
        let message = match &advance.current {
            Some(current) => format!(
                "Round {}: {}'s turn",
                advance.combat.round, current.name
            ),
            None => format!("Round {}", advance.combat.round),
        };
        Self {
            kind: UpdateKind::TurnAdvanced,
            combat: Some(advance.combat.clone()),
            action: None,
            message,
        }
    }

    pub fn action(kind: UpdateKind, combat: &Combat, result: &ActionResult) -> Self {
        Self {
            kind,
            message: result.description.clone(),
            combat: Some(combat.clone()),
            action: Some(result.clone()),
        }
    }

    pub fn ended(combat: &Combat, message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::CombatEnded,
            combat: Some(combat.clone()),
            action: None,
            message: message.into(),
        }
    }
}

/// Sends combat updates to session rooms
#[derive(Clone)]
pub struct BroadcastDispatcher {
    rooms: Arc<RoomRegistry>,
}

impl BroadcastDispatcher {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Deliver `update` to everyone in `room_id`
    pub fn publish(&self, room_id: &str, update: CombatUpdate) -> BroadcastReport {
        let kind = update.kind;
        let message = ServerMessage::Combat {
            room_id: room_id.to_string(),
            data: update,
        };
        let report = self.rooms.broadcast(room_id, &message);
        debug!(
            room_id,
            ?kind,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "Combat update published"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Combatant, CombatantKind};
    use crate::directory::Role;
    use crate::rooms::ConnectionHandle;
    use tokio::sync::mpsc;

    fn combat() -> Combat {
        Combat::new(
            "session-1",
            vec![
                Combatant::new("Aria", CombatantKind::PlayerCharacter, 15, 20),
                Combatant::new("Goblin", CombatantKind::NonPlayerCharacter, 12, 7),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_publish_reaches_session_room() {
        let rooms = Arc::new(RoomRegistry::new(32));
        let (sender, mut rx) = mpsc::channel(4);
        rooms.register(
            "session-1",
            ConnectionHandle {
                id: uuid::Uuid::new_v4(),
                user_id: "u1".into(),
                username: "aria".into(),
                role: Role::Player,
                sender,
            },
        );

        let dispatcher = BroadcastDispatcher::new(rooms);
        let combat = combat();
        let report = dispatcher.publish("session-1", CombatUpdate::started(&combat));
        assert_eq!(report.delivered, 1);

        let frame = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(value["type"], "combat");
        assert_eq!(value["roomId"], "session-1");
        assert_eq!(value["data"]["kind"], "combat_started");
        assert_eq!(value["data"]["combat"]["id"], combat.id.as_str());
        assert!(value["data"].get("action").is_none());
    }

    #[test]
    fn test_publish_without_listeners() {
        let dispatcher = BroadcastDispatcher::new(Arc::new(RoomRegistry::new(32)));
        let report = dispatcher.publish("empty", CombatUpdate::started(&combat()));
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn test_turn_update_messages() {
        let mut combat = combat();
        let current = combat.advance_turn().cloned();
        let advance = TurnAdvance {
            combat: combat.clone(),
            current,
            ended: false,
        };
        let update = CombatUpdate::turn_advanced(&advance);
        assert_eq!(update.kind, UpdateKind::TurnAdvanced);
        assert_eq!(update.message, "Round 1: Goblin's turn");

        let ended = TurnAdvance {
            combat,
            current: None,
            ended: true,
        };
        assert_eq!(CombatUpdate::turn_advanced(&ended).kind, UpdateKind::CombatEnded);
    }
}
