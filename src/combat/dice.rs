//! Dice rolling system
//!
//! Parses notation like "2d6+3", "1d20", "4d6-2" and rolls it through a
//! [`DiceRoller`], so every source of randomness in combat can be scripted.

use std::collections::VecDeque;
use std::str::FromStr;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on dice per expression
pub const MAX_DICE: u32 = 100;

/// Upper bound on faces per die
pub const MAX_SIDES: u32 = 1000;

/// Dice notation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("missing 'd' in dice notation")]
    MissingSeparator,

    #[error("invalid dice count: {0}")]
    InvalidCount(String),

    #[error("invalid die sides: {0}")]
    InvalidSides(String),

    #[error("invalid modifier: {0}")]
    InvalidModifier(String),
}

/// Source of individual die results
pub trait DiceRoller: Send + Sync {
    /// Roll one die, returning a value in `1..=sides`
    fn roll_die(&self, sides: u32) -> u32;
}

/// Thread-local RNG roller used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomRoller;

impl DiceRoller for RandomRoller {
    fn roll_die(&self, sides: u32) -> u32 {
        rand::rng().random_range(1..=sides.max(1))
    }
}

/// Replays a fixed sequence of results.
///
/// Values are clamped into the die's range. Once the script runs out every
/// roll comes up 1.
#[derive(Debug, Default)]
pub struct ScriptedRoller {
    rolls: Mutex<VecDeque<u32>>,
}

impl ScriptedRoller {
    pub fn new(rolls: impl IntoIterator<Item = u32>) -> Self {
        Self {
            rolls: Mutex::new(rolls.into_iter().collect()),
        }
    }

    /// Queue more results behind the current script
    pub fn push(&self, rolls: impl IntoIterator<Item = u32>) {
        self.rolls.lock().extend(rolls);
    }

    pub fn remaining(&self) -> usize {
        self.rolls.lock().len()
    }
}

impl DiceRoller for ScriptedRoller {
    fn roll_die(&self, sides: u32) -> u32 {
        let sides = sides.max(1);
        self.rolls
            .lock()
            .pop_front()
            .map_or(1, |roll| roll.clamp(1, sides))
    }
}

/// A parsed dice expression such as `2d6+3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier to add/subtract
    pub modifier: i32,
}

impl DiceRoll {
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// The same roll with its dice count doubled (critical hits).
    /// The modifier is not doubled.
    pub fn critical(&self) -> Self {
        Self {
            count: self.count * 2,
            ..self.clone()
        }
    }

    /// Roll the dice and return the total
    pub fn roll_with(&self, roller: &dyn DiceRoller) -> i32 {
        self.roll_detailed(roller).1
    }

    /// Roll and return individual die results plus total.
    /// The total saturates at the bounds of `i32`.
    pub fn roll_detailed(&self, roller: &dyn DiceRoller) -> (Vec<u32>, i32) {
        let results: Vec<u32> = (0..self.count).map(|_| roller.roll_die(self.sides)).collect();
        let sum = results.iter().fold(0u32, |acc, r| acc.saturating_add(*r));
        let sum = i32::try_from(sum).unwrap_or(i32::MAX);
        (results, sum.saturating_add(self.modifier))
    }
}

impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl std::fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.modifier {
            0 => write!(f, "{}d{}", self.count, self.sides),
            m if m > 0 => write!(f, "{}d{}+{}", self.count, self.sides, m),
            m => write!(f, "{}d{}{}", self.count, self.sides, m),
        }
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceRoll, DiceError> {
    let notation = notation.trim().to_lowercase();
    let (count_str, rest) = notation
        .split_once('d')
        .ok_or(DiceError::MissingSeparator)?;

    // "d6" means "1d6"
    let count = if count_str.is_empty() {
        1
    } else {
        count_str
            .parse::<u32>()
            .map_err(|_| DiceError::InvalidCount(count_str.to_string()))?
    };
    if count == 0 || count > MAX_DICE {
        return Err(DiceError::InvalidCount(count_str.to_string()));
    }

    let split_at = rest.find(['+', '-']);
    let (sides_str, modifier) = match split_at {
        Some(pos) => {
            let mod_str = &rest[pos..];
            let modifier = mod_str
                .trim_start_matches('+')
                .parse::<i32>()
                .map_err(|_| DiceError::InvalidModifier(mod_str.to_string()))?;
            (&rest[..pos], modifier)
        }
        None => (rest, 0),
    };

    let sides = sides_str
        .parse::<u32>()
        .map_err(|_| DiceError::InvalidSides(sides_str.to_string()))?;
    if sides == 0 || sides > MAX_SIDES {
        return Err(DiceError::InvalidSides(sides_str.to_string()));
    }

    Ok(DiceRoll::new(count, sides, modifier))
}

/// Roll-twice-keep-one modifier for d20 checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Both flags set cancel out to a normal roll
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => Advantage::Advantage,
            (false, true) => Advantage::Disadvantage,
            _ => Advantage::Normal,
        }
    }
}

/// Outcome of a d20 roll, with the discarded die under (dis)advantage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D20Roll {
    pub natural: u32,
    pub discarded: Option<u32>,
}

impl D20Roll {
    /// Natural 20
    pub fn is_critical(&self) -> bool {
        is_critical(self.natural)
    }

    /// Natural 1
    pub fn is_fumble(&self) -> bool {
        is_fumble(self.natural)
    }
}

/// Roll a d20, twice under advantage or disadvantage
pub fn roll_d20(roller: &dyn DiceRoller, advantage: Advantage) -> D20Roll {
    let first = roller.roll_die(20);
    match advantage {
        Advantage::Normal => D20Roll {
            natural: first,
            discarded: None,
        },
        Advantage::Advantage | Advantage::Disadvantage => {
            let second = roller.roll_die(20);
            let keep_high = advantage == Advantage::Advantage;
            let (kept, other) = if (first >= second) == keep_high {
                (first, second)
            } else {
                (second, first)
            };
            D20Roll {
                natural: kept,
                discarded: Some(other),
            }
        }
    }
}

/// Check if a d20 roll is a natural 20 (critical hit)
pub fn is_critical(roll: u32) -> bool {
    roll == 20
}

/// Check if a d20 roll is a natural 1 (critical fail)
pub fn is_fumble(roll: u32) -> bool {
    roll == 1
}
