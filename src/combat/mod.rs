//! Combat system module
//!
//! Turn-based combat held entirely in memory:
//! - Dice rolling (e.g., "2d6+3") with advantage/disadvantage
//! - Initiative order, turns and rounds
//! - Attack resolution with to-hit, criticals and damage
//! - Saving throws, direct damage and healing
//! - A concurrency-safe store of live combats

mod action;
mod dice;
mod engine;
mod error;
mod state;
mod store;

pub use action::{
    roll_damage, Ability, ActionKind, ActionRequest, ActionResult, Amount, DamageEntry,
    DamageType, SavingThrow,
};
pub use dice::{
    parse_dice, roll_d20, Advantage, D20Roll, DiceError, DiceRoll, DiceRoller, RandomRoller,
    ScriptedRoller,
};
pub use engine::{ActionOutcome, AttackRoll, CombatEngine, TurnAdvance};
pub use error::CombatError;
pub use state::{turn_order, Combat, Combatant, CombatantKind};
pub use store::{CombatStore, SharedCombat};
