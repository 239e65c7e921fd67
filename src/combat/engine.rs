//! Combat engine
//!
//! Lifecycle, turn progression and action resolution for combats held in a
//! [`CombatStore`]. Every operation locks only the combat it touches and
//! treats an ended combat exactly like a missing one.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::action::{
    roll_damage, ActionKind, ActionRequest, ActionResult, Amount, DamageEntry, SavingThrow,
};
use super::dice::{roll_d20, Advantage, D20Roll, DiceRoller};
use super::error::CombatError;
use super::state::{Combat, Combatant};
use super::store::CombatStore;

/// Result of an attack roll against a target's armor class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackRoll {
    /// The kept d20
    pub roll: u32,
    /// Roll plus attack bonus
    pub attack_total: i32,
    pub target_ac: i32,
    pub hit: bool,
    pub critical: bool,
    pub fumble: bool,
}

impl AttackRoll {
    pub fn new(d20: D20Roll, attack_bonus: i32, target_ac: i32) -> Self {
        let critical = d20.is_critical();
        let fumble = d20.is_fumble();
        let attack_total = (d20.natural as i32).saturating_add(attack_bonus);

        // Critical always hits, fumble always misses
        let hit = critical || (!fumble && attack_total >= target_ac);

        Self {
            roll: d20.natural,
            attack_total,
            target_ac,
            hit,
            critical,
            fumble,
        }
    }
}

/// State after a turn advance
#[derive(Debug, Clone)]
pub struct TurnAdvance {
    pub combat: Combat,
    /// Who acts now; `None` when nobody was left standing
    pub current: Option<Combatant>,
    /// The combat ended because no combatant could act
    pub ended: bool,
}

/// A resolved action with the combat as it stands afterwards
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub result: ActionResult,
    pub combat: Combat,
    /// Set when the action ended the actor's turn
    pub turn: Option<TurnAdvance>,
}

pub struct CombatEngine {
    store: Arc<CombatStore>,
    roller: Arc<dyn DiceRoller>,
}

impl CombatEngine {
    pub fn new(store: Arc<CombatStore>, roller: Arc<dyn DiceRoller>) -> Self {
        Self { store, roller }
    }

    pub fn store(&self) -> &CombatStore {
        &self.store
    }

    pub fn roller(&self) -> &dyn DiceRoller {
        self.roller.as_ref()
    }

    /// Lock a combat, failing if it is missing or already ended
    async fn lock_active(&self, id: &str) -> Result<OwnedMutexGuard<Combat>, CombatError> {
        let handle = self.store.get(id).await.ok_or(CombatError::CombatNotFound)?;
        let combat = handle.lock_owned().await;
        if !combat.is_active {
            return Err(CombatError::CombatNotFound);
        }
        Ok(combat)
    }

    /// Begin a combat and store it under a fresh id
    pub async fn start_combat(
        &self,
        session_id: &str,
        combatants: Vec<Combatant>,
    ) -> Result<Combat, CombatError> {
        let combat = Combat::new(session_id, combatants)?;
        let snapshot = combat.clone();
        self.store.insert(combat).await;

        info!(
            combat_id = %snapshot.id,
            session_id = %snapshot.session_id,
            combatants = snapshot.combatants.len(),
            "Combat started"
        );
        Ok(snapshot)
    }

    pub async fn get_combat(&self, id: &str) -> Result<Combat, CombatError> {
        Ok(self.lock_active(id).await?.clone())
    }

    pub async fn session_combats(&self, session_id: &str) -> Vec<Combat> {
        self.store.for_session(session_id).await
    }

    /// Advance to the next standing combatant.
    ///
    /// With nobody left above 0 HP the combat ends and is removed.
    pub async fn next_turn(&self, id: &str) -> Result<TurnAdvance, CombatError> {
        let mut combat = self.lock_active(id).await?;
        let advance = advance(&mut combat);
        drop(combat);

        self.finish_if_ended(id, &advance).await;
        Ok(advance)
    }

    /// Resolve one action against a combat
    pub async fn process_action(
        &self,
        id: &str,
        request: ActionRequest,
    ) -> Result<ActionOutcome, CombatError> {
        let mut combat = self.lock_active(id).await?;
        let actor = combat.require(request.actor_id())?.clone();

        if request.is_turn_bound() {
            if actor.is_down() {
                return Err(CombatError::CombatantDown(actor.id));
            }
            if !combat.is_current(&actor.id) {
                let current_id = combat
                    .current_combatant()
                    .map(|c| c.id.clone())
                    .unwrap_or_default();
                return Err(CombatError::NotYourTurn {
                    actor_id: actor.id,
                    current_id,
                });
            }
        }

        let kind = request.kind();
        let roller = self.roller.as_ref();
        let mut turn = None;
        let result = match request {
            ActionRequest::Attack {
                target_id,
                damage,
                attack_bonus,
                advantage,
                disadvantage,
                ..
            } => resolve_attack(
                &mut combat,
                roller,
                &actor,
                &target_id,
                &damage,
                attack_bonus.unwrap_or(actor.attack_bonus),
                Advantage::from_flags(advantage, disadvantage),
            )?,
            ActionRequest::Spell {
                target_id,
                spell_name,
                damage,
                ..
            } => resolve_spell(
                &mut combat,
                roller,
                &actor,
                target_id.as_deref(),
                &spell_name,
                &damage,
            )?,
            ActionRequest::Heal {
                target_id, amount, ..
            } => resolve_heal(&mut combat, roller, &actor, &target_id, &amount)?,
            ActionRequest::Move { destination, .. } => {
                let description = if destination.trim().is_empty() {
                    format!("{} moves", actor.name)
                } else {
                    format!("{} moves to {}", actor.name, destination.trim())
                };
                ActionResult::new(&actor, ActionKind::Move, description)
            }
            ActionRequest::SavingThrow {
                ability,
                dc,
                modifier,
                advantage,
                disadvantage,
                ..
            } => resolve_save(
                roller,
                &actor,
                &SavingThrow {
                    ability,
                    dc,
                    modifier,
                    advantage,
                    disadvantage,
                },
            ),
            ActionRequest::EndTurn { .. } => {
                let advanced = advance(&mut combat);
                let description = match &advanced.current {
                    Some(next) => format!("{} ends their turn. {} is up.", actor.name, next.name),
                    None => format!(
                        "{} ends their turn. Nobody is left standing.",
                        actor.name
                    ),
                };
                turn = Some(advanced);
                ActionResult::new(&actor, ActionKind::EndTurn, description)
            }
        };

        let snapshot = combat.clone();
        drop(combat);

        if let Some(advanced) = &turn {
            self.finish_if_ended(id, advanced).await;
        }

        debug!(combat_id = %id, action = ?kind, "{}", result.description);
        Ok(ActionOutcome {
            result,
            combat: snapshot,
            turn,
        })
    }

    /// Apply damage directly to a combatant, outside the turn order
    pub async fn apply_damage(
        &self,
        id: &str,
        combatant_id: &str,
        entries: &[DamageEntry],
    ) -> Result<ActionOutcome, CombatError> {
        if entries.is_empty() {
            return Err(CombatError::invalid("at least one damage entry is required"));
        }

        let mut combat = self.lock_active(id).await?;
        combat.require(combatant_id)?;

        let total = roll_damage(entries, self.roller.as_ref(), false)?;
        let target = combat
            .combatant_mut(combatant_id)
            .ok_or_else(|| CombatError::CombatantNotFound(combatant_id.to_string()))?;
        target.take_damage(total);

        let mut description = format!(
            "{} takes {} damage ({}/{} HP)",
            target.name, total, target.hp, target.max_hp
        );
        if target.is_down() {
            description.push_str(&format!(". {} is down!", target.name));
        }
        let mut result = ActionResult::new(target, ActionKind::Damage, description);
        result.damage = Some(total);
        let result = result.with_target(target);

        Ok(ActionOutcome {
            result,
            combat: combat.clone(),
            turn: None,
        })
    }

    /// Heal a combatant directly, outside the turn order
    pub async fn heal_combatant(
        &self,
        id: &str,
        combatant_id: &str,
        amount: &Amount,
    ) -> Result<ActionOutcome, CombatError> {
        let mut combat = self.lock_active(id).await?;
        let combatant = combat.require(combatant_id)?.clone();
        let result = resolve_heal(
            &mut combat,
            self.roller.as_ref(),
            &combatant,
            combatant_id,
            amount,
        )?;

        Ok(ActionOutcome {
            result,
            combat: combat.clone(),
            turn: None,
        })
    }

    /// Roll a saving throw for a combatant
    pub async fn saving_throw(
        &self,
        id: &str,
        combatant_id: &str,
        save: &SavingThrow,
    ) -> Result<ActionOutcome, CombatError> {
        let combat = self.lock_active(id).await?;
        let combatant = combat.require(combatant_id)?;
        let result = resolve_save(self.roller.as_ref(), combatant, save);

        Ok(ActionOutcome {
            result,
            combat: combat.clone(),
            turn: None,
        })
    }

    /// End a combat. Later lookups report it as not found.
    pub async fn end_combat(&self, id: &str) -> Result<Combat, CombatError> {
        let mut combat = self.lock_active(id).await?;
        combat.is_active = false;
        let snapshot = combat.clone();
        drop(combat);

        self.store.remove(id).await;
        info!(combat_id = %id, rounds = snapshot.round, "Combat ended");
        Ok(snapshot)
    }

    async fn finish_if_ended(&self, id: &str, advance: &TurnAdvance) {
        if advance.ended {
            self.store.remove(id).await;
            info!(combat_id = %id, "Combat ended with no combatants standing");
        }
    }
}

/// Advance the turn, deactivating the combat when nobody can act
fn advance(combat: &mut Combat) -> TurnAdvance {
    let current = combat.advance_turn().cloned();
    if current.is_none() {
        combat.is_active = false;
    }
    TurnAdvance {
        ended: current.is_none(),
        current,
        combat: combat.clone(),
    }
}

fn down_suffix(target: &Combatant) -> String {
    if target.is_down() {
        format!(" {} is down!", target.name)
    } else {
        String::new()
    }
}

fn resolve_attack(
    combat: &mut Combat,
    roller: &dyn DiceRoller,
    actor: &Combatant,
    target_id: &str,
    damage: &[DamageEntry],
    attack_bonus: i32,
    advantage: Advantage,
) -> Result<ActionResult, CombatError> {
    let target_ac = combat.require(target_id)?.armor_class;
    for entry in damage {
        entry.amount.validate()?;
    }

    let attack = AttackRoll::new(roll_d20(roller, advantage), attack_bonus, target_ac);
    let rolled = if attack.hit {
        Some(roll_damage(damage, roller, attack.critical)?)
    } else {
        None
    };

    let target = combat
        .combatant_mut(target_id)
        .ok_or_else(|| CombatError::CombatantNotFound(target_id.to_string()))?;
    if let Some(amount) = rolled {
        target.take_damage(amount);
    }

    let description = match rolled {
        Some(amount) if attack.critical => format!(
            "{} lands a critical hit on {} for {} damage (natural 20).{}",
            actor.name,
            target.name,
            amount,
            down_suffix(target)
        ),
        Some(amount) => format!(
            "{} hits {} for {} damage ({} vs AC {}).{}",
            actor.name,
            target.name,
            amount,
            attack.attack_total,
            attack.target_ac,
            down_suffix(target)
        ),
        None if attack.fumble => format!(
            "{} fumbles the attack against {} (natural 1).",
            actor.name, target.name
        ),
        None => format!(
            "{} misses {} ({} vs AC {}).",
            actor.name, target.name, attack.attack_total, attack.target_ac
        ),
    };

    let mut result = ActionResult::new(actor, ActionKind::Attack, description);
    result.roll = Some(attack.roll);
    result.total = Some(attack.attack_total);
    result.hit = Some(attack.hit);
    result.critical = attack.critical;
    result.damage = rolled;
    Ok(result.with_target(target))
}

fn resolve_spell(
    combat: &mut Combat,
    roller: &dyn DiceRoller,
    actor: &Combatant,
    target_id: Option<&str>,
    spell_name: &str,
    damage: &[DamageEntry],
) -> Result<ActionResult, CombatError> {
    let spell_name = spell_name.trim();
    if spell_name.is_empty() {
        return Err(CombatError::invalid("spell name is required"));
    }

    let Some(target_id) = target_id else {
        if !damage.is_empty() {
            return Err(CombatError::invalid("spell damage requires a target"));
        }
        return Ok(ActionResult::new(
            actor,
            ActionKind::Spell,
            format!("{} casts {}.", actor.name, spell_name),
        ));
    };

    combat.require(target_id)?;
    let rolled = if damage.is_empty() {
        None
    } else {
        Some(roll_damage(damage, roller, false)?)
    };

    let target = combat
        .combatant_mut(target_id)
        .ok_or_else(|| CombatError::CombatantNotFound(target_id.to_string()))?;
    let description = match rolled {
        Some(amount) => {
            target.take_damage(amount);
            format!(
                "{} casts {} on {} for {} damage.{}",
                actor.name,
                spell_name,
                target.name,
                amount,
                down_suffix(target)
            )
        }
        None => format!("{} casts {} on {}.", actor.name, spell_name, target.name),
    };

    let mut result = ActionResult::new(actor, ActionKind::Spell, description);
    result.damage = rolled;
    Ok(result.with_target(target))
}

fn resolve_heal(
    combat: &mut Combat,
    roller: &dyn DiceRoller,
    actor: &Combatant,
    target_id: &str,
    amount: &Amount,
) -> Result<ActionResult, CombatError> {
    combat.require(target_id)?;
    amount.validate()?;
    let rolled = amount.roll(roller, false)?;

    let target = combat
        .combatant_mut(target_id)
        .ok_or_else(|| CombatError::CombatantNotFound(target_id.to_string()))?;
    target.heal(rolled);

    let description = if actor.id == target.id {
        format!(
            "{} heals for {} HP ({}/{} HP).",
            target.name, rolled, target.hp, target.max_hp
        )
    } else {
        format!(
            "{} heals {} for {} HP ({}/{} HP).",
            actor.name, target.name, rolled, target.hp, target.max_hp
        )
    };

    let mut result = ActionResult::new(actor, ActionKind::Heal, description);
    result.healing = Some(rolled);
    Ok(result.with_target(target))
}

fn resolve_save(roller: &dyn DiceRoller, combatant: &Combatant, save: &SavingThrow) -> ActionResult {
    let d20 = roll_d20(roller, Advantage::from_flags(save.advantage, save.disadvantage));
    let total = (d20.natural as i32).saturating_add(save.modifier);
    let success = total >= save.dc;

    let description = format!(
        "{} {} a {} saving throw ({} vs DC {}).",
        combatant.name,
        if success { "succeeds on" } else { "fails" },
        save.ability,
        total,
        save.dc
    );

    let mut result = ActionResult::new(combatant, ActionKind::SavingThrow, description);
    result.roll = Some(d20.natural);
    result.total = Some(total);
    result.success = Some(success);
    result
}
