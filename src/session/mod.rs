//! Combat session orchestration
//!
//! Ties a verified caller's request to the gate, the engine and the
//! broadcast dispatcher. Every mutating call follows the same path:
//! snapshot → authorize → mutate → publish.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::broadcast::{BroadcastDispatcher, CombatUpdate, UpdateKind};
use crate::combat::{
    ActionOutcome, ActionRequest, Amount, Combat, CombatEngine, CombatError, Combatant,
    CombatantKind, DamageEntry, SavingThrow, TurnAdvance,
};
use crate::directory::{CharacterDirectory, DirectoryError, Identity};
use crate::permissions::{CombatAction, CombatGate, GateError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CombatError> for ServiceError {
    fn from(err: CombatError) -> Self {
        match err {
            CombatError::CombatNotFound | CombatError::CombatantNotFound(_) => {
                ServiceError::NotFound(err.to_string())
            }
            CombatError::NotYourTurn { .. }
            | CombatError::CombatantDown(_)
            | CombatError::Invalid(_)
            | CombatError::Dice(_) => ServiceError::Validation(err.to_string()),
        }
    }
}

impl From<DirectoryError> for ServiceError {
    fn from(err: DirectoryError) -> Self {
        error!(error = %err, "Directory lookup failed");
        ServiceError::Internal(err.to_string())
    }
}

impl From<GateError> for ServiceError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Forbidden(reason) => ServiceError::Forbidden(reason),
            GateError::NotFound(what) => ServiceError::NotFound(what),
            GateError::Directory(e) => e.into(),
        }
    }
}

/// Body of `POST /combat/start`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCombatRequest {
    pub session_id: String,
    pub combatants: Vec<CombatantInput>,
}

/// A combatant as submitted by the facilitator.
///
/// With `character_id` set, missing fields come from the character's stat
/// block. Missing initiative is rolled as d20 + initiative bonus.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<CombatantKind>,
    #[serde(default)]
    pub initiative: Option<i32>,
    #[serde(default)]
    pub hp: Option<i32>,
    #[serde(default)]
    pub max_hp: Option<i32>,
    #[serde(default)]
    pub armor_class: Option<i32>,
    #[serde(default)]
    pub attack_bonus: Option<i32>,
    #[serde(default)]
    pub character_id: Option<String>,
}

pub struct CombatService {
    engine: Arc<CombatEngine>,
    gate: CombatGate,
    dispatcher: BroadcastDispatcher,
    characters: Arc<dyn CharacterDirectory>,
}

impl CombatService {
    pub fn new(
        engine: Arc<CombatEngine>,
        gate: CombatGate,
        dispatcher: BroadcastDispatcher,
        characters: Arc<dyn CharacterDirectory>,
    ) -> Self {
        Self {
            engine,
            gate,
            dispatcher,
            characters,
        }
    }

    pub fn engine(&self) -> &CombatEngine {
        &self.engine
    }

    pub async fn start_combat(
        &self,
        caller: &Identity,
        request: StartCombatRequest,
    ) -> Result<Combat, ServiceError> {
        if request.session_id.trim().is_empty() {
            return Err(ServiceError::Validation("sessionId is required".to_string()));
        }
        if request.combatants.is_empty() {
            return Err(ServiceError::Validation(
                "at least one combatant is required".to_string(),
            ));
        }

        self.gate
            .require(caller, &request.session_id, CombatAction::Start, None)
            .await?;

        let mut combatants = Vec::with_capacity(request.combatants.len());
        for input in request.combatants {
            combatants.push(self.resolve_combatant(input).await?);
        }

        let combat = self
            .engine
            .start_combat(&request.session_id, combatants)
            .await?;
        info!(combat_id = %combat.id, user_id = %caller.user_id, "Combat started by facilitator");
        self.dispatcher
            .publish(&combat.session_id, CombatUpdate::started(&combat));
        Ok(combat)
    }

    /// Public read of an active combat
    pub async fn get_combat(&self, combat_id: &str) -> Result<Combat, ServiceError> {
        Ok(self.engine.get_combat(combat_id).await?)
    }

    pub async fn session_combats(&self, session_id: &str) -> Vec<Combat> {
        self.engine.session_combats(session_id).await
    }

    pub async fn next_turn(
        &self,
        caller: &Identity,
        combat_id: &str,
    ) -> Result<TurnAdvance, ServiceError> {
        let snapshot = self.engine.get_combat(combat_id).await?;
        self.gate
            .require(caller, &snapshot.session_id, CombatAction::AdvanceTurn, None)
            .await?;

        let advance = self.engine.next_turn(combat_id).await?;
        self.dispatcher
            .publish(&snapshot.session_id, CombatUpdate::turn_advanced(&advance));
        Ok(advance)
    }

    /// Resolve an action, authorized against the acting combatant
    pub async fn process_action(
        &self,
        caller: &Identity,
        combat_id: &str,
        request: ActionRequest,
    ) -> Result<ActionOutcome, ServiceError> {
        let snapshot = self.engine.get_combat(combat_id).await?;
        let actor = snapshot.require(request.actor_id())?;
        self.gate
            .require(caller, &snapshot.session_id, CombatAction::Act, Some(actor))
            .await?;

        let outcome = self.engine.process_action(combat_id, request).await?;
        self.dispatcher.publish(
            &snapshot.session_id,
            CombatUpdate::action(UpdateKind::Action, &outcome.combat, &outcome.result),
        );
        if let Some(turn) = &outcome.turn {
            self.dispatcher
                .publish(&snapshot.session_id, CombatUpdate::turn_advanced(turn));
        }
        Ok(outcome)
    }

    pub async fn saving_throw(
        &self,
        caller: &Identity,
        combat_id: &str,
        combatant_id: &str,
        save: &SavingThrow,
    ) -> Result<ActionOutcome, ServiceError> {
        let session_id = self
            .authorize_combatant(caller, combat_id, combatant_id, CombatAction::SavingThrow)
            .await?;
        let outcome = self
            .engine
            .saving_throw(combat_id, combatant_id, save)
            .await?;
        self.publish_outcome(&session_id, UpdateKind::SavingThrow, &outcome);
        Ok(outcome)
    }

    pub async fn apply_damage(
        &self,
        caller: &Identity,
        combat_id: &str,
        combatant_id: &str,
        entries: &[DamageEntry],
    ) -> Result<ActionOutcome, ServiceError> {
        let session_id = self
            .authorize_combatant(caller, combat_id, combatant_id, CombatAction::Damage)
            .await?;
        let outcome = self
            .engine
            .apply_damage(combat_id, combatant_id, entries)
            .await?;
        self.publish_outcome(&session_id, UpdateKind::Damage, &outcome);
        Ok(outcome)
    }

    pub async fn heal(
        &self,
        caller: &Identity,
        combat_id: &str,
        combatant_id: &str,
        amount: &Amount,
    ) -> Result<ActionOutcome, ServiceError> {
        let session_id = self
            .authorize_combatant(caller, combat_id, combatant_id, CombatAction::Heal)
            .await?;
        let outcome = self
            .engine
            .heal_combatant(combat_id, combatant_id, amount)
            .await?;
        self.publish_outcome(&session_id, UpdateKind::Heal, &outcome);
        Ok(outcome)
    }

    pub async fn end_combat(&self, caller: &Identity, combat_id: &str) -> Result<Combat, ServiceError> {
        let snapshot = self.engine.get_combat(combat_id).await?;
        self.gate
            .require(caller, &snapshot.session_id, CombatAction::End, None)
            .await?;

        let combat = self.engine.end_combat(combat_id).await?;
        self.dispatcher.publish(
            &combat.session_id,
            CombatUpdate::ended(&combat, "Combat ended by the DM"),
        );
        Ok(combat)
    }

    /// Gate a per-combatant route against the addressed combatant.
    /// Returns the combat's session id.
    async fn authorize_combatant(
        &self,
        caller: &Identity,
        combat_id: &str,
        combatant_id: &str,
        action: CombatAction,
    ) -> Result<String, ServiceError> {
        let snapshot = self.engine.get_combat(combat_id).await?;
        let combatant = snapshot.require(combatant_id)?;
        self.gate
            .require(caller, &snapshot.session_id, action, Some(combatant))
            .await?;
        Ok(snapshot.session_id)
    }

    fn publish_outcome(&self, session_id: &str, kind: UpdateKind, outcome: &ActionOutcome) {
        self.dispatcher.publish(
            session_id,
            CombatUpdate::action(kind, &outcome.combat, &outcome.result),
        );
    }

    async fn resolve_combatant(&self, input: CombatantInput) -> Result<Combatant, ServiceError> {
        let character = match input.character_id.as_deref() {
            Some(id) => Some(
                self.characters
                    .find_character(id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("character {id} not found")))?,
            ),
            None => None,
        };
        let stats = character.as_ref().map(|c| c.stats);

        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .or_else(|| character.as_ref().map(|c| c.name.clone()))
            .ok_or_else(|| ServiceError::Validation("combatant name is required".to_string()))?;

        let max_hp = input
            .max_hp
            .or(stats.map(|s| s.max_hp))
            .ok_or_else(|| ServiceError::Validation(format!("maxHp is required for {name}")))?;
        if max_hp <= 0 {
            return Err(ServiceError::Validation(format!(
                "maxHp must be positive for {name}"
            )));
        }

        let initiative = match input.initiative {
            Some(initiative) => initiative,
            None => {
                let bonus = stats.map_or(0, |s| s.initiative_bonus);
                (self.engine.roller().roll_die(20) as i32).saturating_add(bonus)
            }
        };

        let kind = input.kind.unwrap_or(if character.is_some() {
            CombatantKind::PlayerCharacter
        } else {
            CombatantKind::NonPlayerCharacter
        });

        let mut combatant = Combatant::new(&name, kind, initiative, max_hp)
            .with_hp(input.hp.or(stats.map(|s| s.current_hp)).unwrap_or(max_hp))
            .with_armor_class(input.armor_class.or(stats.map(|s| s.armor_class)).unwrap_or(10))
            .with_attack_bonus(input.attack_bonus.or(stats.map(|s| s.attack_bonus)).unwrap_or(0));
        if let Some(character) = &character {
            combatant = combatant.with_character(&character.id);
        }
        Ok(combatant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{CombatStore, ScriptedRoller};
    use crate::db::test_utils::{insert_account, test_pool};
    use crate::directory::{Role, SqliteDirectory, StatBlock};
    use crate::rooms::{ConnectionHandle, RoomRegistry};
    use axum::extract::ws::Utf8Bytes;
    use tokio::sync::mpsc;

    struct Fixture {
        service: CombatService,
        roller: Arc<ScriptedRoller>,
        dir: SqliteDirectory,
        session_id: String,
        dm: Identity,
        player: Identity,
        rx: mpsc::Receiver<Utf8Bytes>,
    }

    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        let dm_id = insert_account(&pool, "dm").await;
        let player_id = insert_account(&pool, "player").await;
        let dir = SqliteDirectory::new(pool);
        let session = dir.create_session("Lost Mine", &dm_id).await.unwrap();

        let roller = Arc::new(ScriptedRoller::new([]));
        let engine = Arc::new(CombatEngine::new(Arc::new(CombatStore::new()), roller.clone()));
        let rooms = Arc::new(RoomRegistry::new(32));
        let (sender, rx) = mpsc::channel(64);
        rooms.register(
            &session.id,
            ConnectionHandle {
                id: uuid::Uuid::new_v4(),
                user_id: player_id.clone(),
                username: "player".into(),
                role: Role::Player,
                sender,
            },
        );

        let shared = Arc::new(dir.clone());
        let service = CombatService::new(
            engine,
            CombatGate::new(shared.clone(), shared.clone()),
            BroadcastDispatcher::new(rooms),
            shared,
        );

        Fixture {
            service,
            roller,
            dir,
            session_id: session.id,
            dm: Identity {
                user_id: dm_id,
                username: "dm".into(),
                role: Role::Dm,
            },
            player: Identity {
                user_id: player_id,
                username: "player".into(),
                role: Role::Player,
            },
            rx,
        }
    }

    fn npc(name: &str, initiative: i32, max_hp: i32) -> CombatantInput {
        CombatantInput {
            name: Some(name.to_string()),
            initiative: Some(initiative),
            max_hp: Some(max_hp),
            ..Default::default()
        }
    }

    fn next_kind(rx: &mut mpsc::Receiver<Utf8Bytes>) -> String {
        let frame = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        value["data"]["kind"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_start_requires_facilitator() {
        let f = fixture().await;
        let request = StartCombatRequest {
            session_id: f.session_id.clone(),
            combatants: vec![npc("Goblin", 10, 7)],
        };

        let denied = f.service.start_combat(&f.player, request.clone()).await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

        let missing = f
            .service
            .start_combat(
                &f.dm,
                StartCombatRequest {
                    session_id: "nope".into(),
                    ..request.clone()
                },
            )
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        let combat = f.service.start_combat(&f.dm, request).await.unwrap();
        assert_eq!(combat.combatants.len(), 1);
    }

    #[tokio::test]
    async fn test_start_validation() {
        let f = fixture().await;
        let empty = StartCombatRequest {
            session_id: f.session_id.clone(),
            combatants: vec![],
        };
        assert!(matches!(
            f.service.start_combat(&f.dm, empty).await,
            Err(ServiceError::Validation(_))
        ));

        let nameless = StartCombatRequest {
            session_id: f.session_id.clone(),
            combatants: vec![CombatantInput {
                max_hp: Some(5),
                ..Default::default()
            }],
        };
        assert!(matches!(
            f.service.start_combat(&f.dm, nameless).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_character_fills_stats_and_rolls_initiative() {
        let mut f = fixture().await;
        let character = f
            .dir
            .create_character(
                &f.player.user_id,
                "Aria",
                StatBlock {
                    max_hp: 24,
                    current_hp: 18,
                    armor_class: 15,
                    attack_bonus: 5,
                    initiative_bonus: 3,
                },
            )
            .await
            .unwrap();
        f.roller.push([12]);

        let combat = f
            .service
            .start_combat(
                &f.dm,
                StartCombatRequest {
                    session_id: f.session_id.clone(),
                    combatants: vec![CombatantInput {
                        character_id: Some(character.id.clone()),
                        ..Default::default()
                    }],
                },
            )
            .await
            .unwrap();

        let aria = &combat.combatants[0];
        assert_eq!(aria.name, "Aria");
        assert_eq!(aria.initiative, 15);
        assert_eq!((aria.hp, aria.max_hp, aria.armor_class), (18, 24, 15));
        assert!(aria.is_player_character);
        assert_eq!(aria.character_id.as_deref(), Some(character.id.as_str()));
        assert_eq!(next_kind(&mut f.rx), "combat_started");
    }

    #[tokio::test]
    async fn test_owner_acts_for_own_character_only() {
        let mut f = fixture().await;
        let character = f
            .dir
            .create_character(&f.player.user_id, "Aria", StatBlock::default())
            .await
            .unwrap();
        let combat = f
            .service
            .start_combat(
                &f.dm,
                StartCombatRequest {
                    session_id: f.session_id.clone(),
                    combatants: vec![
                        CombatantInput {
                            character_id: Some(character.id.clone()),
                            initiative: Some(18),
                            ..Default::default()
                        },
                        npc("Goblin", 10, 7),
                    ],
                },
            )
            .await
            .unwrap();
        next_kind(&mut f.rx);

        let aria = combat.turn_order[0].clone();
        let goblin = combat.turn_order[1].clone();

        let moved = f
            .service
            .process_action(
                &f.player,
                &combat.id,
                ActionRequest::Move {
                    actor_id: aria.clone(),
                    destination: "the door".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.result.description, "Aria moves to the door");
        assert_eq!(next_kind(&mut f.rx), "action");

        let denied = f
            .service
            .process_action(&f.player, &combat.id, ActionRequest::EndTurn { actor_id: goblin.clone() })
            .await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

        let hurt = f
            .service
            .apply_damage(
                &f.player,
                &combat.id,
                &goblin,
                &[DamageEntry::new(Amount::Flat(3), Default::default())],
            )
            .await;
        assert!(matches!(hurt, Err(ServiceError::Forbidden(_))));

        let advance = f.service.next_turn(&f.player, &combat.id).await;
        assert!(matches!(advance, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_dm_flow_and_end() {
        let mut f = fixture().await;
        let combat = f
            .service
            .start_combat(
                &f.dm,
                StartCombatRequest {
                    session_id: f.session_id.clone(),
                    combatants: vec![npc("Orc", 14, 15), npc("Goblin", 10, 7)],
                },
            )
            .await
            .unwrap();
        next_kind(&mut f.rx);
        let goblin = combat.turn_order[1].clone();

        let turn = f.service.next_turn(&f.dm, &combat.id).await.unwrap();
        assert_eq!(turn.current.unwrap().id, goblin);
        assert_eq!(next_kind(&mut f.rx), "turn_advanced");

        let hit = f
            .service
            .apply_damage(
                &f.dm,
                &combat.id,
                &goblin,
                &[DamageEntry::new(Amount::Flat(4), Default::default())],
            )
            .await
            .unwrap();
        assert_eq!(hit.result.target_hp, Some(3));
        assert_eq!(next_kind(&mut f.rx), "damage");

        let healed = f
            .service
            .heal(&f.dm, &combat.id, &goblin, &Amount::Flat(10))
            .await
            .unwrap();
        assert_eq!(healed.result.healing, Some(10));
        assert_eq!(healed.result.target_hp, Some(7));
        assert_eq!(next_kind(&mut f.rx), "heal");

        let listed = f.service.session_combats(&f.session_id).await;
        assert_eq!(listed.len(), 1);

        f.service.end_combat(&f.dm, &combat.id).await.unwrap();
        assert_eq!(next_kind(&mut f.rx), "combat_ended");
        assert!(matches!(
            f.service.get_combat(&combat.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(f.service.session_combats(&f.session_id).await.is_empty());
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            ServiceError::from(CombatError::CombatNotFound),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            ServiceError::from(CombatError::NotYourTurn {
                actor_id: "a".into(),
                current_id: "b".into()
            }),
            ServiceError::Validation(ref msg) if msg == "not this combatant's turn"
        ));
        assert!(matches!(
            ServiceError::from(GateError::Forbidden("no".into())),
            ServiceError::Forbidden(_)
        ));
    }
}
