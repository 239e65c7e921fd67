//! Combat state tracking
//!
//! A [`Combat`] is one encounter: its combatants, the initiative order and
//! whose turn it is. All HP changes go through [`Combatant`] so the
//! `0 <= hp <= max_hp` invariant holds after every mutation.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CombatError;

/// Who controls a combatant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombatantKind {
    #[serde(alias = "pc", alias = "player")]
    PlayerCharacter,
    #[serde(alias = "npc", alias = "monster")]
    NonPlayerCharacter,
}

/// A participant in a combat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub id: String,
    pub name: String,
    pub kind: CombatantKind,
    pub initiative: i32,
    pub hp: i32,
    pub max_hp: i32,
    pub armor_class: i32,
    pub attack_bonus: i32,
    /// Character record this combatant was built from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    pub is_player_character: bool,
}

impl Combatant {
    /// Create a combatant at full health with AC 10 and no attack bonus
    pub fn new(name: &str, kind: CombatantKind, initiative: i32, max_hp: i32) -> Self {
        let max_hp = max_hp.max(0);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            initiative,
            hp: max_hp,
            max_hp,
            armor_class: 10,
            attack_bonus: 0,
            character_id: None,
            is_player_character: kind == CombatantKind::PlayerCharacter,
        }
    }

    /// Set current HP, clamped into `0..=max_hp`
    pub fn with_hp(mut self, hp: i32) -> Self {
        self.hp = hp.clamp(0, self.max_hp);
        self
    }

    pub fn with_armor_class(mut self, armor_class: i32) -> Self {
        self.armor_class = armor_class;
        self
    }

    pub fn with_attack_bonus(mut self, attack_bonus: i32) -> Self {
        self.attack_bonus = attack_bonus;
        self
    }

    pub fn with_character(mut self, character_id: &str) -> Self {
        self.character_id = Some(character_id.to_string());
        self
    }

    /// Whether the combatant is at 0 HP
    pub fn is_down(&self) -> bool {
        self.hp <= 0
    }

    /// Lose HP, never below 0. Returns the HP actually lost.
    pub fn take_damage(&mut self, amount: i32) -> i32 {
        let lost = amount.max(0).min(self.hp);
        self.hp -= lost;
        lost
    }

    /// Regain HP, never above max. Returns the HP actually restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let restored = amount.max(0).min(self.max_hp - self.hp);
        self.hp += restored;
        restored
    }
}

/// Deterministic initiative ordering.
///
/// Higher initiative first; ties go to player characters, then to names in
/// case-insensitive alphabetical order. Remaining ties keep input order.
fn initiative_order(a: &Combatant, b: &Combatant) -> Ordering {
    b.initiative
        .cmp(&a.initiative)
        .then_with(|| b.is_player_character.cmp(&a.is_player_character))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

/// Compute the turn order for a set of combatants
pub fn turn_order(combatants: &[Combatant]) -> Vec<String> {
    let mut sorted: Vec<&Combatant> = combatants.iter().collect();
    // sort_by is stable, so equal keys keep their input order
    sorted.sort_by(|a, b| initiative_order(a, b));
    sorted.into_iter().map(|c| c.id.clone()).collect()
}

/// One turn-based encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combat {
    pub id: String,
    pub session_id: String,
    pub combatants: Vec<Combatant>,
    pub turn_order: Vec<String>,
    pub current_turn_index: usize,
    pub round: u32,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
}

impl Combat {
    /// Create an active combat in round 1 with the highest initiative up
    pub fn new(session_id: &str, combatants: Vec<Combatant>) -> Result<Self, CombatError> {
        if session_id.trim().is_empty() {
            return Err(CombatError::invalid("session id is required"));
        }
        if combatants.is_empty() {
            return Err(CombatError::invalid("at least one combatant is required"));
        }

        let turn_order = turn_order(&combatants);
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            combatants,
            turn_order,
            current_turn_index: 0,
            round: 1,
            is_active: true,
            started_at: Utc::now(),
        })
    }

    pub fn combatant(&self, id: &str) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    pub fn combatant_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.combatants.iter_mut().find(|c| c.id == id)
    }

    /// Look up a combatant or fail with `CombatantNotFound`
    pub fn require(&self, id: &str) -> Result<&Combatant, CombatError> {
        self.combatant(id)
            .ok_or_else(|| CombatError::CombatantNotFound(id.to_string()))
    }

    /// The combatant whose turn it is
    pub fn current_combatant(&self) -> Option<&Combatant> {
        self.turn_order
            .get(self.current_turn_index)
            .and_then(|id| self.combatant(id))
    }

    pub fn is_current(&self, combatant_id: &str) -> bool {
        self.turn_order.get(self.current_turn_index).map(String::as_str) == Some(combatant_id)
    }

    /// Whether anyone is still above 0 HP
    pub fn has_standing_combatants(&self) -> bool {
        self.combatants.iter().any(|c| !c.is_down())
    }

    /// Move to the next combatant above 0 HP.
    ///
    /// Passing the end of the order wraps to the top and starts a new round.
    /// Returns `None` and leaves the combat untouched when nobody can act.
    pub fn advance_turn(&mut self) -> Option<&Combatant> {
        if !self.has_standing_combatants() {
            return None;
        }

        let len = self.turn_order.len();
        let mut round = self.round;

        for step in 1..=len {
            let raw = self.current_turn_index + step;
            if raw == len {
                round += 1;
            }
            let index = raw % len;
            let standing = self
                .combatant(&self.turn_order[index])
                .is_some_and(|c| !c.is_down());
            if standing {
                self.current_turn_index = index;
                self.round = round;
                return self.current_combatant();
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pc(name: &str, initiative: i32) -> Combatant {
        Combatant::new(name, CombatantKind::PlayerCharacter, initiative, 20)
    }

    fn npc(name: &str, initiative: i32) -> Combatant {
        Combatant::new(name, CombatantKind::NonPlayerCharacter, initiative, 10)
    }

    fn names(combat: &Combat) -> Vec<String> {
        combat
            .turn_order
            .iter()
            .map(|id| combat.combatant(id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_empty_combat_rejected() {
        assert!(matches!(
            Combat::new("session", vec![]),
            Err(CombatError::Invalid(_))
        ));
        assert!(Combat::new("  ", vec![pc("Aria", 10)]).is_err());
    }

    #[test]
    fn test_turn_order_descending() {
        let combat = Combat::new(
            "session",
            vec![npc("Goblin", 12), pc("Aria", 15), npc("Ogre", 3), pc("Bram", 18)],
        )
        .unwrap();

        assert_eq!(names(&combat), vec!["Bram", "Aria", "Goblin", "Ogre"]);
        assert_eq!(combat.current_turn_index, 0);
        assert_eq!(combat.round, 1);
        assert!(combat.is_active);
    }

    #[test]
    fn test_turn_order_tie_break() {
        let combat = Combat::new(
            "session",
            vec![
                npc("zombie", 10),
                npc("Bandit", 10),
                pc("Zed", 10),
                pc("anya", 10),
                npc("Bandit", 10),
            ],
        )
        .unwrap();

        // PCs first, then case-insensitive names, then input order
        assert_eq!(
            names(&combat),
            vec!["anya", "Zed", "Bandit", "Bandit", "zombie"]
        );
        let bandits: Vec<&String> = combat
            .turn_order
            .iter()
            .filter(|id| combat.combatant(id).unwrap().name == "Bandit")
            .collect();
        assert_eq!(bandits[0], &combat.combatants[1].id);
        assert_eq!(bandits[1], &combat.combatants[4].id);
    }

    #[test]
    fn test_turn_order_is_permutation() {
        let combatants: Vec<Combatant> = (0..12).map(|i| npc(&format!("m{i}"), i % 4)).collect();
        let combat = Combat::new("session", combatants.clone()).unwrap();

        let mut ordered = combat.turn_order.clone();
        let mut ids: Vec<String> = combatants.iter().map(|c| c.id.clone()).collect();
        ordered.sort();
        ids.sort();
        assert_eq!(ordered, ids);

        let initiatives: Vec<i32> = combat
            .turn_order
            .iter()
            .map(|id| combat.combatant(id).unwrap().initiative)
            .collect();
        assert!(initiatives.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_two_combatant_rounds() {
        let mut combat = Combat::new("session", vec![npc("Goblin", 12), pc("Aria", 15)]).unwrap();
        assert_eq!(combat.current_combatant().unwrap().name, "Aria");

        let next = combat.advance_turn().unwrap();
        assert_eq!(next.name, "Goblin");
        assert_eq!((combat.current_turn_index, combat.round), (1, 1));

        let next = combat.advance_turn().unwrap();
        assert_eq!(next.name, "Aria");
        assert_eq!((combat.current_turn_index, combat.round), (0, 2));
    }

    #[test]
    fn test_full_cycle_increments_round_once() {
        let mut combat = Combat::new(
            "session",
            vec![pc("A", 20), pc("B", 15), npc("C", 10), npc("D", 5)],
        )
        .unwrap();
        combat.advance_turn();
        let (start_index, start_round) = (combat.current_turn_index, combat.round);

        for _ in 0..combat.turn_order.len() {
            combat.advance_turn().unwrap();
        }

        assert_eq!(combat.current_turn_index, start_index);
        assert_eq!(combat.round, start_round + 1);
    }

    #[test]
    fn test_advance_skips_downed() {
        let mut combat =
            Combat::new("session", vec![pc("A", 20), npc("B", 15), npc("C", 10)]).unwrap();
        let b = combat.turn_order[1].clone();
        combat.combatant_mut(&b).unwrap().take_damage(100);

        assert_eq!(combat.advance_turn().unwrap().name, "C");
        assert_eq!(combat.advance_turn().unwrap().name, "A");
        assert_eq!(combat.round, 2);
    }

    #[test]
    fn test_advance_with_nobody_standing() {
        let mut combat = Combat::new("session", vec![pc("A", 20), npc("B", 15)]).unwrap();
        for c in combat.combatants.iter_mut() {
            c.take_damage(1000);
        }

        assert!(combat.advance_turn().is_none());
        assert_eq!((combat.current_turn_index, combat.round), (0, 1));
        assert!(!combat.has_standing_combatants());
    }

    #[test]
    fn test_hp_clamping() {
        let mut ogre = npc("Ogre", 1).with_hp(4);
        assert_eq!(ogre.hp, 4);

        assert_eq!(ogre.take_damage(1_000_000), 4);
        assert_eq!(ogre.hp, 0);
        assert!(ogre.is_down());

        assert_eq!(ogre.heal(3), 3);
        assert_eq!(ogre.heal(500), 7);
        assert_eq!(ogre.hp, ogre.max_hp);

        // Negative amounts never move HP the wrong way
        assert_eq!(ogre.take_damage(-5), 0);
        assert_eq!(ogre.heal(-5), 0);
        assert_eq!(ogre.hp, 10);

        assert_eq!(npc("Imp", 1).with_hp(99).hp, 10);
        assert_eq!(npc("Imp", 1).with_hp(-3).hp, 0);
    }
}
