//! Dice rolling for the engine.
//!
//! Supports the single-component notation `NdX±M` (e.g. "2d6+3",
//! "1d20-1"), advantage and disadvantage on single d20 rolls, and a
//! seedable session roller for reproducible runs.
//!
//! The `critical`/`fumble` flags are markers only: this module never
//! interprets their consequences (that belongs to the combat rules).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for dice parsing and rolling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("Invalid dice notation: '{0}'. Expected NdX, dX, NdX+M or NdX-M")]
    InvalidNotation(String),
    #[error("Invalid die: d{0}. Valid dice: d4, d6, d8, d10, d12, d20, d100")]
    InvalidDie(u32),
    #[error("Dice count must be at least 1")]
    NoDice,
}

/// Die faces allowed by the engine.
pub const VALID_FACES: [u32; 7] = [4, 6, 8, 10, 12, 20, 100];

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

/// A parsed dice expression: `count` dice of `faces` faces plus a flat
/// modifier. Compound expressions ("2d6+1d4") are out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpr {
    pub count: u32,
    pub faces: u32,
    pub modifier: i32,
}

impl DiceExpr {
    /// Parse a notation string such as "2d6+3", "d8" or "1d20-1".
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let text: String = notation
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let d_pos = text
            .find('d')
            .ok_or_else(|| DiceError::InvalidNotation(notation.to_string()))?;

        let count_str = &text[..d_pos];
        let rest = &text[d_pos + 1..];

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(notation.to_string()))?
        };
        if count == 0 {
            return Err(DiceError::NoDice);
        }

        let (faces_str, modifier) = match rest.find(['+', '-']) {
            Some(sign_pos) => {
                let modifier: i32 = rest[sign_pos..]
                    .parse()
                    .map_err(|_| DiceError::InvalidNotation(notation.to_string()))?;
                (&rest[..sign_pos], modifier)
            }
            None => (rest, 0),
        };

        let faces: u32 = faces_str
            .parse()
            .map_err(|_| DiceError::InvalidNotation(notation.to_string()))?;
        if !VALID_FACES.contains(&faces) {
            return Err(DiceError::InvalidDie(faces));
        }

        Ok(DiceExpr {
            count,
            faces,
            modifier,
        })
    }

    /// Same expression with the dice count doubled (critical damage).
    /// The flat modifier is untouched.
    pub fn doubled_dice(&self) -> DiceExpr {
        DiceExpr {
            count: self.count * 2,
            faces: self.faces,
            modifier: self.modifier,
        }
    }

    fn is_single_d20(&self) -> bool {
        self.count == 1 && self.faces == 20
    }
}

impl FromStr for DiceExpr {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpr::parse(s)
    }
}

impl fmt::Display for DiceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.faces)?;
        match self.modifier.cmp(&0) {
            std::cmp::Ordering::Greater => write!(f, "+{}", self.modifier),
            std::cmp::Ordering::Less => write!(f, "{}", self.modifier),
            std::cmp::Ordering::Equal => Ok(()),
        }
    }
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    /// Kept dice values.
    pub dice: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub expression: String,
    pub mode: RollMode,
    /// Dice dropped by advantage/disadvantage.
    pub discarded: Vec<u32>,
    /// Natural 20 on a single d20. A marker, not a rule consequence.
    pub critical: bool,
    /// Natural 1 on a single d20. A marker, not a rule consequence.
    pub fumble: bool,
    pub is_d20: bool,
}

impl RollResult {
    /// Check whether the roll meets or exceeds a DC.
    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dice: Vec<String> = self.dice.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dice.join("+"))?;
        match self.modifier.cmp(&0) {
            std::cmp::Ordering::Greater => write!(f, "+{}", self.modifier)?,
            std::cmp::Ordering::Less => write!(f, "{}", self.modifier)?,
            std::cmp::Ordering::Equal => {}
        }
        write!(f, " = {}", self.total)?;
        if !self.discarded.is_empty() {
            let dropped: Vec<String> = self.discarded.iter().map(|d| d.to_string()).collect();
            write!(f, " (discarded: {})", dropped.join(","))?;
        }
        Ok(())
    }
}

/// Ability score generation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityGenMethod {
    /// Roll 4d6 and drop the lowest, six times (PHB standard).
    FourD6DropLowest,
    /// Roll 3d6 straight, six times.
    ThreeD6,
    /// The fixed array 15, 14, 13, 12, 10, 8.
    StandardArray,
}

/// The session's random source.
///
/// One logical roller per game session. With a seed set, an identical
/// sequence of calls produces identical results.
pub struct Roller {
    seed: Option<u64>,
    rng: StdRng,
}

impl Roller {
    /// Roller seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            seed: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Roller with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fix the seed for reproducibility.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// The current seed, if one was set.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Back to fully random.
    pub fn reset(&mut self) {
        self.seed = None;
        self.rng = StdRng::from_entropy();
    }

    fn die(&mut self, faces: u32) -> u32 {
        self.rng.gen_range(1..=faces)
    }

    /// Roll a notation string.
    pub fn roll(&mut self, notation: &str, mode: RollMode) -> Result<RollResult, DiceError> {
        let expr = DiceExpr::parse(notation)?;
        Ok(self.roll_expr(&expr, mode))
    }

    /// Roll a parsed expression.
    ///
    /// Advantage/disadvantage only applies to single d20 rolls; for any
    /// other expression it is ignored and the result records `Normal`.
    pub fn roll_expr(&mut self, expr: &DiceExpr, mode: RollMode) -> RollResult {
        let is_d20 = expr.is_single_d20();

        if is_d20 && mode != RollMode::Normal {
            let first = self.die(20);
            let second = self.die(20);
            let (kept, dropped) = match mode {
                RollMode::Advantage => (first.max(second), first.min(second)),
                RollMode::Disadvantage => (first.min(second), first.max(second)),
                RollMode::Normal => unreachable!(),
            };
            return RollResult {
                dice: vec![kept],
                modifier: expr.modifier,
                total: kept as i32 + expr.modifier,
                expression: expr.to_string(),
                mode,
                discarded: vec![dropped],
                critical: kept == 20,
                fumble: kept == 1,
                is_d20: true,
            };
        }

        let dice: Vec<u32> = (0..expr.count).map(|_| self.die(expr.faces)).collect();
        let total = dice.iter().sum::<u32>() as i32 + expr.modifier;

        RollResult {
            critical: is_d20 && dice[0] == 20,
            fumble: is_d20 && dice[0] == 1,
            dice,
            modifier: expr.modifier,
            total,
            expression: expr.to_string(),
            mode: if is_d20 { mode } else { RollMode::Normal },
            discarded: Vec::new(),
            is_d20,
        }
    }

    fn roll_d20_with_bonus(&mut self, bonus: i32, mode: RollMode) -> RollResult {
        let expr = DiceExpr {
            count: 1,
            faces: 20,
            modifier: bonus,
        };
        self.roll_expr(&expr, mode)
    }

    /// Attack roll: 1d20 + bonus. The result carries crit/fumble flags.
    pub fn roll_attack(&mut self, bonus: i32, mode: RollMode) -> RollResult {
        self.roll_d20_with_bonus(bonus, mode)
    }

    /// Saving throw: 1d20 + bonus.
    pub fn roll_save(&mut self, bonus: i32, mode: RollMode) -> RollResult {
        self.roll_d20_with_bonus(bonus, mode)
    }

    /// Skill check: 1d20 + bonus.
    pub fn roll_skill(&mut self, bonus: i32, mode: RollMode) -> RollResult {
        self.roll_d20_with_bonus(bonus, mode)
    }

    /// Initiative: 1d20 + DEX modifier + other bonuses.
    pub fn roll_initiative(&mut self, dex_mod: i32, extra: i32) -> RollResult {
        self.roll_d20_with_bonus(dex_mod + extra, RollMode::Normal)
    }

    /// Damage roll. On a critical the dice count is doubled; the flat
    /// modifier is not.
    pub fn roll_damage(&mut self, notation: &str, critical: bool) -> Result<RollResult, DiceError> {
        let expr = DiceExpr::parse(notation)?;
        let expr = if critical { expr.doubled_dice() } else { expr };
        Ok(self.roll_expr(&expr, RollMode::Normal))
    }

    /// Generate the six ability score values, sorted descending.
    pub fn roll_ability_array(&mut self, method: AbilityGenMethod) -> Vec<u8> {
        let mut values: Vec<u8> = match method {
            AbilityGenMethod::StandardArray => vec![15, 14, 13, 12, 10, 8],
            AbilityGenMethod::ThreeD6 => (0..6)
                .map(|_| (0..3).map(|_| self.die(6)).sum::<u32>() as u8)
                .collect(),
            AbilityGenMethod::FourD6DropLowest => (0..6)
                .map(|_| {
                    let mut dice: Vec<u32> = (0..4).map(|_| self.die(6)).collect();
                    dice.sort_unstable();
                    dice[1..].iter().sum::<u32>() as u8
                })
                .collect(),
        };
        values.sort_unstable_by(|a, b| b.cmp(a));
        values
    }
}

impl Default for Roller {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of comparing an attack roll against a target's AC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub hits: bool,
    pub critical: bool,
    pub fumble: bool,
}

/// Resolve whether an attack roll hits.
///
/// A fumble always misses; a critical always hits; otherwise the total
/// is compared against the target AC.
pub fn resolve_attack_roll(roll: &RollResult, target_ac: i32) -> AttackOutcome {
    if roll.fumble {
        return AttackOutcome {
            hits: false,
            critical: false,
            fumble: true,
        };
    }
    if roll.critical {
        return AttackOutcome {
            hits: true,
            critical: true,
            fumble: false,
        };
    }
    AttackOutcome {
        hits: roll.total >= target_ac,
        critical: false,
        fumble: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let expr = DiceExpr::parse("1d20").unwrap();
        assert_eq!(expr.count, 1);
        assert_eq!(expr.faces, 20);
        assert_eq!(expr.modifier, 0);
    }

    #[test]
    fn parse_implicit_count_and_modifiers() {
        assert_eq!(
            DiceExpr::parse("d8").unwrap(),
            DiceExpr {
                count: 1,
                faces: 8,
                modifier: 0
            }
        );
        assert_eq!(DiceExpr::parse("2d6+3").unwrap().modifier, 3);
        assert_eq!(DiceExpr::parse("1d20-2").unwrap().modifier, -2);
        assert_eq!(DiceExpr::parse(" 2 d 6 + 1 ").unwrap().count, 2);
    }

    #[test]
    fn parse_rejects_invalid() {
        assert!(matches!(
            DiceExpr::parse("2d7"),
            Err(DiceError::InvalidDie(7))
        ));
        assert!(matches!(DiceExpr::parse("0d6"), Err(DiceError::NoDice)));
        assert!(DiceExpr::parse("garbage").is_err());
        assert!(DiceExpr::parse("2d6+1d4").is_err());
        assert!(DiceExpr::parse("").is_err());
    }

    #[test]
    fn roll_stays_in_range() {
        let mut roller = Roller::seeded(7);
        for _ in 0..200 {
            let result = roller.roll("1d20+5", RollMode::Normal).unwrap();
            assert!(result.total >= 6 && result.total <= 25);
        }
    }

    #[test]
    fn seeded_rolls_reproduce() {
        let mut a = Roller::seeded(12345);
        let mut b = Roller::seeded(12345);
        for _ in 0..50 {
            assert_eq!(
                a.roll("2d6+3", RollMode::Normal).unwrap(),
                b.roll("2d6+3", RollMode::Normal).unwrap()
            );
            assert_eq!(
                a.roll_attack(5, RollMode::Advantage),
                b.roll_attack(5, RollMode::Advantage)
            );
        }
    }

    #[test]
    fn set_seed_restarts_sequence() {
        let mut roller = Roller::seeded(99);
        let first: Vec<i32> = (0..10)
            .map(|_| roller.roll("1d20", RollMode::Normal).unwrap().total)
            .collect();
        roller.set_seed(99);
        let second: Vec<i32> = (0..10)
            .map(|_| roller.roll("1d20", RollMode::Normal).unwrap().total)
            .collect();
        assert_eq!(first, second);
        assert_eq!(roller.seed(), Some(99));
    }

    #[test]
    fn advantage_keeps_higher_die() {
        let mut roller = Roller::seeded(4);
        for _ in 0..100 {
            let result = roller.roll("1d20", RollMode::Advantage).unwrap();
            assert_eq!(result.dice.len(), 1);
            assert_eq!(result.discarded.len(), 1);
            assert!(result.dice[0] >= result.discarded[0]);
        }
    }

    #[test]
    fn disadvantage_keeps_lower_die() {
        let mut roller = Roller::seeded(4);
        for _ in 0..100 {
            let result = roller.roll("1d20", RollMode::Disadvantage).unwrap();
            assert!(result.dice[0] <= result.discarded[0]);
        }
    }

    #[test]
    fn advantage_ignored_off_d20() {
        let mut roller = Roller::seeded(1);
        let result = roller.roll("2d6", RollMode::Advantage).unwrap();
        assert_eq!(result.mode, RollMode::Normal);
        assert_eq!(result.dice.len(), 2);
        assert!(result.discarded.is_empty());
        assert!(!result.is_d20);
    }

    #[test]
    fn crit_flags_only_on_single_d20() {
        let mut roller = Roller::seeded(0);
        let mut seen_flag = false;
        for _ in 0..400 {
            let result = roller.roll("1d20", RollMode::Normal).unwrap();
            if result.critical || result.fumble {
                seen_flag = true;
            }
            let multi = roller.roll("2d6", RollMode::Normal).unwrap();
            assert!(!multi.critical && !multi.fumble);
        }
        assert!(seen_flag);
    }

    #[test]
    fn critical_damage_doubles_dice_not_modifier() {
        let mut roller = Roller::seeded(11);
        let normal = roller.roll_damage("1d8+3", false).unwrap();
        assert_eq!(normal.dice.len(), 1);
        assert_eq!(normal.modifier, 3);

        let critical = roller.roll_damage("1d8+3", true).unwrap();
        assert_eq!(critical.dice.len(), 2);
        assert_eq!(critical.modifier, 3);
    }

    #[test]
    fn attack_resolution_table() {
        let base = RollResult {
            dice: vec![10],
            modifier: 5,
            total: 15,
            expression: "1d20+5".into(),
            mode: RollMode::Normal,
            discarded: vec![],
            critical: false,
            fumble: false,
            is_d20: true,
        };

        assert!(resolve_attack_roll(&base, 13).hits);
        assert!(resolve_attack_roll(&base, 15).hits);
        assert!(!resolve_attack_roll(&base, 16).hits);

        let crit = RollResult {
            critical: true,
            ..base.clone()
        };
        let outcome = resolve_attack_roll(&crit, 30);
        assert!(outcome.hits && outcome.critical);

        let fumble = RollResult {
            fumble: true,
            total: 25,
            ..base
        };
        let outcome = resolve_attack_roll(&fumble, 1);
        assert!(!outcome.hits && outcome.fumble);
    }

    #[test]
    fn ability_array_methods() {
        let mut roller = Roller::seeded(3);
        assert_eq!(
            roller.roll_ability_array(AbilityGenMethod::StandardArray),
            vec![15, 14, 13, 12, 10, 8]
        );
        let rolled = roller.roll_ability_array(AbilityGenMethod::FourD6DropLowest);
        assert_eq!(rolled.len(), 6);
        for value in &rolled {
            assert!((3..=18).contains(value));
        }
        assert!(rolled.windows(2).all(|w| w[0] >= w[1]));
        for value in roller.roll_ability_array(AbilityGenMethod::ThreeD6) {
            assert!((3..=18).contains(&value));
        }
    }
}
