//! Core 5e rule primitives.
//!
//! Pure functions and the shared rule vocabulary: ability scores,
//! skills, conditions and damage types. Dice live in [`crate::dice`];
//! nothing here rolls.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Abilities
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn all() -> [Ability; 6] {
        [
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// Ability scores container. Serializes with the Spanish content-schema
/// keys used across compendium and save files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    #[serde(rename = "fuerza")]
    pub strength: u8,
    #[serde(rename = "destreza")]
    pub dexterity: u8,
    #[serde(rename = "constitucion")]
    pub constitution: u8,
    #[serde(rename = "inteligencia")]
    pub intelligence: u8,
    #[serde(rename = "sabiduria")]
    pub wisdom: u8,
    #[serde(rename = "carisma")]
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn get(&self, ability: Ability) -> u8 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        ability_modifier(self.get(ability))
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

/// Ability modifier: floor((score - 10) / 2).
pub fn ability_modifier(score: u8) -> i32 {
    (score as i32 - 10).div_euclid(2)
}

/// Proficiency bonus by character level (1-20).
pub fn proficiency_bonus(level: u8) -> i32 {
    match level {
        0..=4 => 2,
        5..=8 => 3,
        9..=12 => 4,
        13..=16 => 5,
        _ => 6,
    }
}

/// Spell save DC: 8 + casting ability modifier + proficiency bonus.
pub fn spell_save_dc(ability_mod: i32, proficiency: i32) -> i32 {
    8 + ability_mod + proficiency
}

/// Spell attack bonus: casting ability modifier + proficiency bonus.
pub fn spell_attack_bonus(ability_mod: i32, proficiency: i32) -> i32 {
    ability_mod + proficiency
}

/// AC contribution of a worn armor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmorAc {
    pub base: i32,
    /// Cap on the DEX modifier (None = uncapped, as light armor).
    pub max_dex_bonus: Option<i32>,
}

/// Base armor class.
///
/// Unarmored: 10 + DEX mod. Armored: armor base + DEX mod capped by the
/// armor. A shield adds 2 either way.
pub fn base_ac(armor: Option<ArmorAc>, dex_mod: i32, shield: bool) -> i32 {
    let ac = match armor {
        None => 10 + dex_mod,
        Some(armor) => {
            let dex = match armor.max_dex_bonus {
                Some(cap) => dex_mod.min(cap),
                None => dex_mod,
            };
            armor.base + dex
        }
    };
    if shield {
        ac + 2
    } else {
        ac
    }
}

/// Carrying capacity in pounds: Strength × 15.
pub fn carry_capacity_lb(strength: u8) -> u32 {
    strength as u32 * 15
}

// ============================================================================
// Skills
// ============================================================================

/// The 18 skills, keyed by their Spanish content names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Skill {
    #[serde(rename = "acrobacias")]
    Acrobatics,
    #[serde(rename = "arcanos")]
    Arcana,
    #[serde(rename = "atletismo")]
    Athletics,
    #[serde(rename = "engaño")]
    Deception,
    #[serde(rename = "historia")]
    History,
    #[serde(rename = "interpretacion")]
    Performance,
    #[serde(rename = "intimidacion")]
    Intimidation,
    #[serde(rename = "investigacion")]
    Investigation,
    #[serde(rename = "juego_manos")]
    SleightOfHand,
    #[serde(rename = "medicina")]
    Medicine,
    #[serde(rename = "naturaleza")]
    Nature,
    #[serde(rename = "percepcion")]
    Perception,
    #[serde(rename = "perspicacia")]
    Insight,
    #[serde(rename = "persuasion")]
    Persuasion,
    #[serde(rename = "religion")]
    Religion,
    #[serde(rename = "sigilo")]
    Stealth,
    #[serde(rename = "supervivencia")]
    Survival,
    #[serde(rename = "trato_animales")]
    AnimalHandling,
}

impl Skill {
    /// Stable content key, as used by the vocabulary and save files.
    pub fn key(&self) -> &'static str {
        match self {
            Skill::Acrobatics => "acrobacias",
            Skill::Arcana => "arcanos",
            Skill::Athletics => "atletismo",
            Skill::Deception => "engaño",
            Skill::History => "historia",
            Skill::Performance => "interpretacion",
            Skill::Intimidation => "intimidacion",
            Skill::Investigation => "investigacion",
            Skill::SleightOfHand => "juego_manos",
            Skill::Medicine => "medicina",
            Skill::Nature => "naturaleza",
            Skill::Perception => "percepcion",
            Skill::Insight => "perspicacia",
            Skill::Persuasion => "persuasion",
            Skill::Religion => "religion",
            Skill::Stealth => "sigilo",
            Skill::Survival => "supervivencia",
            Skill::AnimalHandling => "trato_animales",
        }
    }

    /// Parse a content key. The set is closed: anything else is not a
    /// skill.
    pub fn from_key(key: &str) -> Option<Skill> {
        Skill::all().into_iter().find(|s| s.key() == key)
    }

    /// The ability the skill rides on.
    pub fn ability(&self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }

    pub fn all() -> [Skill; 18] {
        [
            Skill::Acrobatics,
            Skill::Arcana,
            Skill::Athletics,
            Skill::Deception,
            Skill::History,
            Skill::Performance,
            Skill::Intimidation,
            Skill::Investigation,
            Skill::SleightOfHand,
            Skill::Medicine,
            Skill::Nature,
            Skill::Perception,
            Skill::Insight,
            Skill::Persuasion,
            Skill::Religion,
            Skill::Stealth,
            Skill::Survival,
            Skill::AnimalHandling,
        ]
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// 5e conditions, plus the engine-level `Dodging` marker set by the
/// Dodge action until the start of the combatant's next turn.
///
/// Ordered so condition sets serialize deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
    Dodging,
}

impl Condition {
    /// Conditions that deny the action economy entirely.
    pub fn blocks_actions(&self) -> bool {
        matches!(
            self,
            Condition::Incapacitated
                | Condition::Paralyzed
                | Condition::Petrified
                | Condition::Stunned
        )
    }

    /// Conditions that pin the creature in place.
    pub fn blocks_movement(&self) -> bool {
        matches!(
            self,
            Condition::Paralyzed
                | Condition::Petrified
                | Condition::Stunned
                | Condition::Unconscious
                | Condition::Grappled
                | Condition::Restrained
        )
    }

    /// Spanish display name for narration.
    pub fn spanish_name(&self) -> &'static str {
        match self {
            Condition::Blinded => "cegado",
            Condition::Charmed => "hechizado",
            Condition::Deafened => "ensordecido",
            Condition::Frightened => "asustado",
            Condition::Grappled => "agarrado",
            Condition::Incapacitated => "incapacitado",
            Condition::Invisible => "invisible",
            Condition::Paralyzed => "paralizado",
            Condition::Petrified => "petrificado",
            Condition::Poisoned => "envenenado",
            Condition::Prone => "derribado",
            Condition::Restrained => "apresado",
            Condition::Stunned => "aturdido",
            Condition::Unconscious => "inconsciente",
            Condition::Dodging => "esquivando",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spanish_name())
    }
}

// ============================================================================
// Damage types
// ============================================================================

/// Damage types, keyed by their Spanish content names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    #[serde(rename = "cortante")]
    Slashing,
    #[serde(rename = "perforante")]
    Piercing,
    #[serde(rename = "contundente")]
    Bludgeoning,
    #[serde(rename = "fuego")]
    Fire,
    #[serde(rename = "frio")]
    Cold,
    #[serde(rename = "relampago")]
    Lightning,
    #[serde(rename = "trueno")]
    Thunder,
    #[serde(rename = "acido")]
    Acid,
    #[serde(rename = "veneno")]
    Poison,
    #[serde(rename = "necrotico")]
    Necrotic,
    #[serde(rename = "radiante")]
    Radiant,
    #[serde(rename = "fuerza")]
    Force,
    #[serde(rename = "psiquico")]
    Psychic,
}

impl DamageType {
    /// Stable content key.
    pub fn key(&self) -> &'static str {
        match self {
            DamageType::Slashing => "cortante",
            DamageType::Piercing => "perforante",
            DamageType::Bludgeoning => "contundente",
            DamageType::Fire => "fuego",
            DamageType::Cold => "frio",
            DamageType::Lightning => "relampago",
            DamageType::Thunder => "trueno",
            DamageType::Acid => "acido",
            DamageType::Poison => "veneno",
            DamageType::Necrotic => "necrotico",
            DamageType::Radiant => "radiante",
            DamageType::Force => "fuerza",
            DamageType::Psychic => "psiquico",
        }
    }

    pub fn from_key(key: &str) -> Option<DamageType> {
        [
            DamageType::Slashing,
            DamageType::Piercing,
            DamageType::Bludgeoning,
            DamageType::Fire,
            DamageType::Cold,
            DamageType::Lightning,
            DamageType::Thunder,
            DamageType::Acid,
            DamageType::Poison,
            DamageType::Necrotic,
            DamageType::Radiant,
            DamageType::Force,
            DamageType::Psychic,
        ]
        .into_iter()
        .find(|d| d.key() == key)
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
