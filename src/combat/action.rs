//! Combat actions and their results
//!
//! Requests arrive as JSON tagged by `actionType`; each variant carries only
//! the fields it needs.

use serde::{Deserialize, Serialize};

use super::dice::{parse_dice, DiceError, DiceRoller};
use super::error::CombatError;
use super::state::Combatant;

/// Types of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageType {
    #[default]
    Physical,
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    #[serde(alias = "ice")]
    Cold,
    #[serde(alias = "electric")]
    Lightning,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Psychic,
    Force,
    Thunder,
}

/// A flat number or a dice expression such as `"2d6+3"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Flat(i32),
    Dice(String),
}

impl Amount {
    /// Reject negative flat amounts and malformed notation before rolling
    pub fn validate(&self) -> Result<(), CombatError> {
        match self {
            Amount::Flat(n) if *n < 0 => Err(CombatError::invalid("amount must not be negative")),
            Amount::Flat(_) => Ok(()),
            Amount::Dice(notation) => parse_dice(notation).map(|_| ()).map_err(Into::into),
        }
    }

    /// Roll the amount. Critical rolls double the dice, never flat values.
    /// The result is never negative.
    pub fn roll(&self, roller: &dyn DiceRoller, critical: bool) -> Result<i32, DiceError> {
        let total = match self {
            Amount::Flat(n) => *n,
            Amount::Dice(notation) => {
                let dice = parse_dice(notation)?;
                let dice = if critical { dice.critical() } else { dice };
                dice.roll_with(roller)
            }
        };
        Ok(total.max(0))
    }
}

/// One component of a damage roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageEntry {
    pub amount: Amount,
    #[serde(rename = "type", default)]
    pub damage_type: DamageType,
}

impl DamageEntry {
    pub fn new(amount: Amount, damage_type: DamageType) -> Self {
        Self {
            amount,
            damage_type,
        }
    }
}

/// Validate then roll a list of damage entries, summing the totals
pub fn roll_damage(
    entries: &[DamageEntry],
    roller: &dyn DiceRoller,
    critical: bool,
) -> Result<i32, CombatError> {
    for entry in entries {
        entry.amount.validate()?;
    }
    let mut total: i32 = 0;
    for entry in entries {
        total = total.saturating_add(entry.amount.roll(roller, critical)?);
    }
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    #[serde(alias = "str")]
    Strength,
    #[serde(alias = "dex")]
    Dexterity,
    #[serde(alias = "con")]
    Constitution,
    #[serde(alias = "int")]
    Intelligence,
    #[serde(alias = "wis")]
    Wisdom,
    #[serde(alias = "cha")]
    Charisma,
}

impl std::fmt::Display for Ability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Ability::Strength => "Strength",
            Ability::Dexterity => "Dexterity",
            Ability::Constitution => "Constitution",
            Ability::Intelligence => "Intelligence",
            Ability::Wisdom => "Wisdom",
            Ability::Charisma => "Charisma",
        };
        f.write_str(s)
    }
}

/// Saving throw parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingThrow {
    pub ability: Ability,
    pub dc: i32,
    #[serde(default)]
    pub modifier: i32,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
}

/// A request to act in combat
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(
    tag = "actionType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ActionRequest {
    Attack {
        actor_id: String,
        target_id: String,
        #[serde(default)]
        damage: Vec<DamageEntry>,
        #[serde(default)]
        attack_bonus: Option<i32>,
        #[serde(default)]
        advantage: bool,
        #[serde(default)]
        disadvantage: bool,
    },
    Spell {
        actor_id: String,
        #[serde(default)]
        target_id: Option<String>,
        spell_name: String,
        #[serde(default)]
        damage: Vec<DamageEntry>,
    },
    Heal {
        actor_id: String,
        target_id: String,
        amount: Amount,
    },
    Move {
        actor_id: String,
        #[serde(default)]
        destination: String,
    },
    SavingThrow {
        actor_id: String,
        ability: Ability,
        dc: i32,
        #[serde(default)]
        modifier: i32,
        #[serde(default)]
        advantage: bool,
        #[serde(default)]
        disadvantage: bool,
    },
    EndTurn {
        actor_id: String,
    },
}

impl ActionRequest {
    /// The combatant performing the action
    pub fn actor_id(&self) -> &str {
        match self {
            ActionRequest::Attack { actor_id, .. }
            | ActionRequest::Spell { actor_id, .. }
            | ActionRequest::Heal { actor_id, .. }
            | ActionRequest::Move { actor_id, .. }
            | ActionRequest::SavingThrow { actor_id, .. }
            | ActionRequest::EndTurn { actor_id } => actor_id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Attack { .. } => ActionKind::Attack,
            ActionRequest::Spell { .. } => ActionKind::Spell,
            ActionRequest::Heal { .. } => ActionKind::Heal,
            ActionRequest::Move { .. } => ActionKind::Move,
            ActionRequest::SavingThrow { .. } => ActionKind::SavingThrow,
            ActionRequest::EndTurn { .. } => ActionKind::EndTurn,
        }
    }

    /// Whether the actor must hold the current turn.
    /// Heals and saving throws can happen out of turn.
    pub fn is_turn_bound(&self) -> bool {
        matches!(
            self,
            ActionRequest::Attack { .. }
                | ActionRequest::Spell { .. }
                | ActionRequest::Move { .. }
                | ActionRequest::EndTurn { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Attack,
    Spell,
    Heal,
    Move,
    SavingThrow,
    EndTurn,
    Damage,
}

/// What happened when an action resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub actor_id: String,
    pub actor_name: String,
    pub action_type: ActionKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// The kept natural d20
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healing: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_hp: Option<i32>,
}

impl ActionResult {
    pub fn new(actor: &Combatant, action_type: ActionKind, description: String) -> Self {
        Self {
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            action_type,
            description,
            target_id: None,
            roll: None,
            total: None,
            hit: None,
            critical: false,
            success: None,
            damage: None,
            healing: None,
            target_hp: None,
        }
    }

    pub fn with_target(mut self, target: &Combatant) -> Self {
        self.target_id = Some(target.id.clone());
        self.target_hp = Some(target.hp);
        self
    }
}
