//! Player character records.
//!
//! A character splits into three regions with different mutation rules:
//! `source` holds player-chosen facts, `derived` is recomputed from
//! `source` and never edited by hand, `current` is the mutable play
//! state. `derived_meta` stamps the last recomputation.

use crate::compendium::Compendium;
use crate::rules::{self, Ability, AbilityScores, Condition, Skill, base_ac, proficiency_bonus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for characters. For a PC, the combat `instance_id`
/// is this id rendered as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Equipped gear slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquippedGear {
    pub main_weapon_id: Option<String>,
    pub off_weapon_id: Option<String>,
    pub armor_id: Option<String>,
    pub shield: bool,
}

/// Player-chosen facts. Mutated only by level-up or explicit
/// equip/learn operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSource {
    pub name: String,
    pub race: String,
    pub class_name: String,
    pub level: u8,
    pub background: String,
    pub abilities: AbilityScores,
    pub base_speed: u32,
    /// Faces of the class hit die (d6-d12).
    pub hit_die: u32,
    pub equipped: EquippedGear,
    pub known_spells: Vec<String>,
    pub prepared_spells: Vec<String>,
    pub casting_ability: Option<Ability>,
    /// Max spell slots per level (1-9).
    pub spell_slots_max: BTreeMap<u8, u8>,
    pub skill_proficiencies: Vec<Skill>,
    pub expertise: Vec<Skill>,
}

/// Everything recomputable from `source`. Never edited directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedStats {
    pub abilities: AbilityScores,
    pub proficiency_bonus: i32,
    pub armor_class: i32,
    pub initiative_mod: i32,
    pub hp_max: i32,
    pub speed: u32,
    /// Final check bonus per skill, keyed by the skill content key.
    pub skill_totals: BTreeMap<String, i32>,
    pub spell_save_dc: Option<i32>,
    pub spell_attack_bonus: Option<i32>,
}

/// Bookkeeping about the derived region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedMeta {
    pub recomputed_at: DateTime<Utc>,
}

/// Death saving throw tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
}

impl DeathSaves {
    /// Record a success; true once three are banked.
    pub fn add_success(&mut self) -> bool {
        self.successes = (self.successes + 1).min(3);
        self.successes >= 3
    }

    /// Record `count` failures; true once three are banked.
    pub fn add_failures(&mut self, count: u8) -> bool {
        self.failures = (self.failures + count).min(3);
        self.failures >= 3
    }

    pub fn reset(&mut self) {
        self.successes = 0;
        self.failures = 0;
    }
}

/// Remaining uses of one spell slot level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub total: u8,
    pub remaining: u8,
}

/// Mutable play state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    pub hp_current: i32,
    pub hp_temp: i32,
    pub conditions: BTreeSet<Condition>,
    pub unconscious: bool,
    pub stable: bool,
    pub dead: bool,
    pub death_saves: DeathSaves,
    pub spell_slots: BTreeMap<u8, SlotState>,
    pub hit_dice_remaining: u8,
    pub xp: u32,
}

/// A persistent player character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: CharacterId,
    pub source: CharacterSource,
    pub derived: DerivedStats,
    pub derived_meta: DerivedMeta,
    pub current: CurrentState,
}

impl CharacterRecord {
    /// Build a fresh character: derive stats and start at full health.
    pub fn new(source: CharacterSource, compendium: &Compendium) -> Self {
        let derived = recompute_derived(&source, compendium);
        let spell_slots = source
            .spell_slots_max
            .iter()
            .map(|(&level, &total)| {
                (
                    level,
                    SlotState {
                        total,
                        remaining: total,
                    },
                )
            })
            .collect();
        let current = CurrentState {
            hp_current: derived.hp_max,
            hp_temp: 0,
            conditions: BTreeSet::new(),
            unconscious: false,
            stable: false,
            dead: false,
            death_saves: DeathSaves::default(),
            spell_slots,
            hit_dice_remaining: source.level,
            xp: 0,
        };
        Self {
            id: CharacterId::new(),
            source,
            derived,
            derived_meta: DerivedMeta {
                recomputed_at: Utc::now(),
            },
            current,
        }
    }

    /// Refresh `derived` after a `source` mutation.
    pub fn recompute(&mut self, compendium: &Compendium) {
        self.derived = recompute_derived(&self.source, compendium);
        self.derived_meta.recomputed_at = Utc::now();
    }

    /// Whether the character can take actions right now.
    pub fn can_act(&self) -> bool {
        !self.current.dead
            && !self.current.unconscious
            && self.current.hp_current > 0
            && !self
                .current
                .conditions
                .iter()
                .any(|c| c.blocks_actions())
    }

    pub fn skill_bonus(&self, skill: Skill) -> i32 {
        self.derived
            .skill_totals
            .get(skill.key())
            .copied()
            .unwrap_or_else(|| self.derived.abilities.modifier(skill.ability()))
    }
}

/// Recompute the derived region from `source`.
///
/// Pure: two equal sources yield equal derived stats.
pub fn recompute_derived(source: &CharacterSource, compendium: &Compendium) -> DerivedStats {
    let abilities = source.abilities.clone();
    let prof = proficiency_bonus(source.level);
    let dex_mod = abilities.modifier(Ability::Dexterity);
    let con_mod = abilities.modifier(Ability::Constitution);

    let armor = source
        .equipped
        .armor_id
        .as_deref()
        .and_then(|id| compendium.armor(id))
        .map(|entry| entry.ac());
    let armor_class = base_ac(armor, dex_mod, source.equipped.shield);

    // Level 1 grants the full die; each level after that the average.
    let die = source.hit_die as i32;
    let per_level = die / 2 + 1;
    let levels_past_first = source.level.saturating_sub(1) as i32;
    let hp_max = (die + con_mod + levels_past_first * (per_level + con_mod)).max(1);

    let mut skill_totals = BTreeMap::new();
    for skill in Skill::all() {
        let mut total = abilities.modifier(skill.ability());
        if source.expertise.contains(&skill) {
            total += prof * 2;
        } else if source.skill_proficiencies.contains(&skill) {
            total += prof;
        }
        skill_totals.insert(skill.key().to_string(), total);
    }

    let (spell_save_dc, spell_attack_bonus) = match source.casting_ability {
        Some(ability) => {
            let cast_mod = abilities.modifier(ability);
            (
                Some(rules::spell_save_dc(cast_mod, prof)),
                Some(rules::spell_attack_bonus(cast_mod, prof)),
            )
        }
        None => (None, None),
    };

    DerivedStats {
        proficiency_bonus: prof,
        armor_class,
        initiative_mod: dex_mod,
        hp_max,
        speed: source.base_speed,
        skill_totals,
        spell_save_dc,
        spell_attack_bonus,
        abilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fighter_source() -> CharacterSource {
        CharacterSource {
            name: "Thorin".into(),
            race: "enano".into(),
            class_name: "guerrero".into(),
            level: 3,
            background: "soldado".into(),
            abilities: AbilityScores::new(16, 12, 14, 10, 11, 9),
            base_speed: 30,
            hit_die: 10,
            equipped: EquippedGear {
                main_weapon_id: Some("espada_larga".into()),
                off_weapon_id: None,
                armor_id: Some("cota_escamas".into()),
                shield: true,
            },
            known_spells: vec![],
            prepared_spells: vec![],
            casting_ability: None,
            spell_slots_max: BTreeMap::new(),
            skill_proficiencies: vec![Skill::Athletics, Skill::Intimidation],
            expertise: vec![],
        }
    }

    #[test]
    fn derived_is_pure_over_source() {
        let compendium = Compendium::builtin();
        let a = recompute_derived(&fighter_source(), &compendium);
        let b = recompute_derived(&fighter_source(), &compendium);
        assert_eq!(a, b);
    }

    #[test]
    fn fighter_numbers() {
        let compendium = Compendium::builtin();
        let derived = recompute_derived(&fighter_source(), &compendium);

        assert_eq!(derived.proficiency_bonus, 2);
        // Scale mail 14 + min(DEX +1, cap 2) + shield 2
        assert_eq!(derived.armor_class, 17);
        assert_eq!(derived.initiative_mod, 1);
        // d10: 10+2 at level 1, +2×(6+2)
        assert_eq!(derived.hp_max, 28);
        // Athletics: STR +3 + prof 2
        assert_eq!(derived.skill_totals["atletismo"], 5);
        // Perception: WIS +0, no proficiency
        assert_eq!(derived.skill_totals["percepcion"], 0);
        assert_eq!(derived.spell_save_dc, None);
    }

    #[test]
    fn caster_numbers() {
        let compendium = Compendium::builtin();
        let mut source = fighter_source();
        source.class_name = "mago".into();
        source.hit_die = 6;
        source.abilities = AbilityScores::new(8, 14, 12, 16, 12, 10);
        source.casting_ability = Some(Ability::Intelligence);
        source.equipped = EquippedGear::default();

        let derived = recompute_derived(&source, &compendium);
        assert_eq!(derived.spell_save_dc, Some(13));
        assert_eq!(derived.spell_attack_bonus, Some(5));
        // Unarmored: 10 + DEX +2
        assert_eq!(derived.armor_class, 12);
    }

    #[test]
    fn new_character_starts_whole() {
        let compendium = Compendium::builtin();
        let mut source = fighter_source();
        source.spell_slots_max.insert(1, 2);
        let record = CharacterRecord::new(source, &compendium);

        assert_eq!(record.current.hp_current, record.derived.hp_max);
        assert_eq!(record.current.spell_slots[&1].remaining, 2);
        assert_eq!(record.current.hit_dice_remaining, 3);
        assert!(record.can_act());
    }

    #[test]
    fn incapacitating_states_deny_actions() {
        let compendium = Compendium::builtin();
        let mut record = CharacterRecord::new(fighter_source(), &compendium);

        record.current.conditions.insert(Condition::Paralyzed);
        assert!(!record.can_act());
        record.current.conditions.clear();

        record.current.unconscious = true;
        assert!(!record.can_act());
        record.current.unconscious = false;

        record.current.dead = true;
        assert!(!record.can_act());
        record.current.dead = false;

        record.current.conditions.insert(Condition::Prone);
        assert!(record.can_act());
    }

    #[test]
    fn death_saves_tally() {
        let mut saves = DeathSaves::default();
        assert!(!saves.add_success());
        assert!(!saves.add_success());
        assert!(saves.add_success());

        saves.reset();
        assert!(!saves.add_failures(2));
        assert!(saves.add_failures(1));
    }

    #[test]
    fn recompute_follows_source_changes() {
        let compendium = Compendium::builtin();
        let mut record = CharacterRecord::new(fighter_source(), &compendium);
        let old_ac = record.derived.armor_class;

        record.source.equipped.shield = false;
        record.recompute(&compendium);
        assert_eq!(record.derived.armor_class, old_ac - 2);
    }
}
