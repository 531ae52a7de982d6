//! Combat state and turn management.
//!
//! The manager owns the canonical combat state: roster, initiative,
//! per-turn economy, HP and conditions. All mutation goes through it;
//! the pipeline only proposes deltas. It does not interpret rules
//! (dice and executor do) and it does not narrate.

use crate::character::{CharacterRecord, DeathSaves};
use crate::compendium::{Compendium, MonsterAction, MonsterInstance};
use crate::dice::Roller;
use crate::normalizer::{ActorProfile, CombatantRef, SceneContext, SpellRef, WeaponRef};
use crate::pipeline::{AppliedOutcome, CombatOutcome, Event, StateDelta};
use crate::rules::{AbilityScores, Ability, Condition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from combat management.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CombatError {
    #[error("El combate ya ha comenzado")]
    AlreadyStarted,
    #[error("El combate no está en curso")]
    NotActive,
    #[error("Se necesitan al menos 2 combatientes")]
    NotEnoughCombatants,
    #[error("Combatiente desconocido: {0}")]
    UnknownCombatant(String),
    #[error("Monstruo '{0}' no encontrado en el compendio")]
    UnknownMonster(String),
    #[error("No hay combatiente activo")]
    NoActiveCombatant,
    #[error("Este cambio de estado ya fue aplicado en este turno")]
    DeltaAlreadyApplied,
    #[error("El combatiente activo no puede hacer tiradas de muerte")]
    NotDying,
}

/// Side a combatant fights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatantCategory {
    Player,
    Ally,
    Enemy,
    Neutral,
}

/// The per-turn budget: one action, one bonus action, one reaction,
/// and a movement allowance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEconomy {
    pub action_used: bool,
    pub bonus_used: bool,
    pub reaction_used: bool,
    pub movement_used: u32,
    /// Extra movement granted this turn (Dash).
    pub bonus_movement: u32,
}

impl TurnEconomy {
    fn reset(&mut self) {
        *self = TurnEconomy::default();
    }
}

/// One participant in the combat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub instance_id: String,
    pub name: String,
    pub category: CombatantCategory,
    pub compendium_ref: Option<String>,
    pub hp_max: i32,
    pub hp_current: i32,
    pub hp_temp: i32,
    pub armor_class: i32,
    pub speed: u32,
    pub abilities: AbilityScores,
    pub proficiency_bonus: i32,
    pub conditions: BTreeSet<Condition>,
    pub initiative: i32,
    pub turn_active: bool,
    pub economy: TurnEconomy,
    pub unconscious: bool,
    pub stable: bool,
    pub dead: bool,
    pub death_saves: DeathSaves,
    pub primary_weapon: Option<WeaponRef>,
    pub secondary_weapon: Option<WeaponRef>,
    pub known_spells: Vec<SpellRef>,
    /// Remaining slots per level.
    pub spell_slots: BTreeMap<u8, u8>,
    pub spell_save_dc: Option<i32>,
    pub spell_attack_bonus: Option<i32>,
    pub skill_bonuses: BTreeMap<String, i32>,
    pub monster_actions: Vec<MonsterAction>,
    /// XP awarded when this combatant falls.
    pub xp: u32,
}

impl Combatant {
    /// Build the combat view of a player character.
    pub fn from_character(record: &CharacterRecord, compendium: &Compendium) -> Self {
        let weapon_ref = |id: &Option<String>| {
            id.as_deref().and_then(|id| {
                compendium.weapon(id).map(|w| WeaponRef {
                    id: w.id.clone(),
                    name: w.name.clone(),
                })
            })
        };
        let known_spells = record
            .source
            .known_spells
            .iter()
            .filter_map(|id| {
                compendium.spell(id).map(|s| SpellRef {
                    id: s.id.clone(),
                    name: s.name.clone(),
                })
            })
            .collect();
        let spell_slots = record
            .current
            .spell_slots
            .iter()
            .map(|(&level, slot)| (level, slot.remaining))
            .collect();
        let skill_bonuses = record.derived.skill_totals.clone();

        Self {
            instance_id: record.id.to_string(),
            name: record.source.name.clone(),
            category: CombatantCategory::Player,
            compendium_ref: None,
            hp_max: record.derived.hp_max,
            hp_current: record.current.hp_current,
            hp_temp: record.current.hp_temp,
            armor_class: record.derived.armor_class,
            speed: record.derived.speed,
            abilities: record.derived.abilities.clone(),
            proficiency_bonus: record.derived.proficiency_bonus,
            conditions: record.current.conditions.clone(),
            initiative: 0,
            turn_active: false,
            economy: TurnEconomy::default(),
            unconscious: record.current.unconscious,
            stable: record.current.stable,
            dead: record.current.dead,
            death_saves: record.current.death_saves.clone(),
            primary_weapon: weapon_ref(&record.source.equipped.main_weapon_id),
            secondary_weapon: weapon_ref(&record.source.equipped.off_weapon_id),
            known_spells,
            spell_slots,
            spell_save_dc: record.derived.spell_save_dc,
            spell_attack_bonus: record.derived.spell_attack_bonus,
            skill_bonuses,
            monster_actions: Vec::new(),
            xp: 0,
        }
    }

    /// Build a combatant from a materialized monster.
    pub fn from_monster_instance(instance: MonsterInstance, category: CombatantCategory) -> Self {
        Self {
            instance_id: instance.instance_id,
            name: instance.name,
            category,
            compendium_ref: instance.compendium_ref,
            hp_max: instance.hp_max,
            hp_current: instance.hp_current,
            hp_temp: 0,
            armor_class: instance.armor_class,
            speed: instance.speed,
            abilities: instance.abilities,
            proficiency_bonus: 2,
            conditions: instance.conditions.into_iter().collect(),
            initiative: 0,
            turn_active: false,
            economy: TurnEconomy::default(),
            unconscious: false,
            stable: false,
            dead: false,
            death_saves: DeathSaves::default(),
            primary_weapon: None,
            secondary_weapon: None,
            known_spells: Vec::new(),
            spell_slots: BTreeMap::new(),
            spell_save_dc: None,
            spell_attack_bonus: None,
            skill_bonuses: BTreeMap::new(),
            monster_actions: instance.actions,
            xp: instance.xp,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.dead
    }

    pub fn can_act(&self) -> bool {
        !self.dead
            && !self.unconscious
            && self.hp_current > 0
            && !self.conditions.iter().any(|c| c.blocks_actions())
    }

    pub fn dex_mod(&self) -> i32 {
        self.abilities.modifier(Ability::Dexterity)
    }

    pub fn movement_remaining(&self) -> u32 {
        (self.speed + self.economy.bonus_movement).saturating_sub(self.economy.movement_used)
    }

    /// Start-of-turn reset. Dodge protection lapses here.
    fn reset_turn(&mut self) {
        self.economy.reset();
        self.conditions.remove(&Condition::Dodging);
    }

    fn as_ref(&self) -> CombatantRef {
        CombatantRef {
            instance_id: self.instance_id.clone(),
            name: self.name.clone(),
            compendium_ref: self.compendium_ref.clone(),
            hp_current: self.hp_current,
            armor_class: self.armor_class,
            dead: self.dead,
            abilities: Some(self.abilities.clone()),
        }
    }

    fn as_actor_profile(&self) -> ActorProfile {
        ActorProfile {
            id: self.instance_id.clone(),
            name: self.name.clone(),
            abilities: self.abilities.clone(),
            proficiency_bonus: self.proficiency_bonus,
            speed: self.speed,
            conditions: self.conditions.clone(),
            unconscious: self.unconscious,
            dead: self.dead,
            hp_current: Some(self.hp_current),
            equipped_main: self.primary_weapon.as_ref().map(|w| w.id.clone()),
            equipped_off: self.secondary_weapon.as_ref().map(|w| w.id.clone()),
            known_spells: self.known_spells.iter().map(|s| s.id.clone()).collect(),
            prepared_spells: self.known_spells.iter().map(|s| s.id.clone()).collect(),
            spell_slots: self.spell_slots.clone(),
            spell_save_dc: self.spell_save_dc,
            spell_attack_bonus: self.spell_attack_bonus,
            skill_bonuses: self.skill_bonuses.clone(),
            monster_actions: self.monster_actions.clone(),
        }
    }
}

/// Battlefield conditions the narrator and future rules may read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub difficult_terrain: bool,
    pub cover: bool,
    pub light: LightLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightLevel {
    #[default]
    Bright,
    Dim,
    Darkness,
}

/// Where the combat stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CombatStatus {
    NotStarted,
    Ongoing,
    Finished { outcome: CombatOutcome },
}

/// An event as recorded in the append-only round history, totally
/// ordered by (round, turn_index, event_index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round: u32,
    pub turn_index: usize,
    pub event_index: usize,
    pub actor_id: String,
    pub event: Event,
    pub recorded_at: DateTime<Utc>,
}

/// Who is up, with what budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnInfo {
    pub instance_id: String,
    pub name: String,
    pub round: u32,
    pub turn_index: usize,
    pub economy: TurnEconomy,
    pub movement_remaining: u32,
}

/// Result of one death saving throw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeathSaveOutcome {
    pub roll: i32,
    pub successes: u8,
    pub failures: u8,
    pub stable: bool,
    pub dead: bool,
    /// Natural 20: back on its feet with 1 HP.
    pub revived: bool,
}

/// End-of-combat report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatSummary {
    pub outcome: CombatOutcome,
    pub rounds: u32,
    pub xp_total: u32,
    pub survivors: Vec<String>,
    pub dead: Vec<String>,
}

/// Owns and mutates the combat state.
#[derive(Serialize, Deserialize)]
pub struct CombatManager {
    combatants: Vec<Combatant>,
    initiative_order: Vec<String>,
    round: u32,
    turn_index: usize,
    status: CombatStatus,
    environment: Environment,
    history: Vec<HistoryEntry>,
    /// Guard against double-applying the same delta in the same turn.
    applied_deltas: BTreeSet<String>,
}

impl CombatManager {
    pub fn new(environment: Environment) -> Self {
        Self {
            combatants: Vec::new(),
            initiative_order: Vec::new(),
            round: 0,
            turn_index: 0,
            status: CombatStatus::NotStarted,
            environment,
            history: Vec::new(),
            applied_deltas: BTreeSet::new(),
        }
    }

    // ========================================================================
    // Setup
    // ========================================================================

    pub fn add_combatant(&mut self, combatant: Combatant) -> Result<(), CombatError> {
        if self.status != CombatStatus::NotStarted {
            return Err(CombatError::AlreadyStarted);
        }
        self.combatants.push(combatant);
        Ok(())
    }

    /// Materialize a monster from the compendium straight into the
    /// roster. Returns its fresh instance id.
    pub fn spawn_from_compendium(
        &mut self,
        compendium: &Compendium,
        monster_id: &str,
        name: Option<&str>,
        category: CombatantCategory,
    ) -> Result<String, CombatError> {
        let instance = compendium
            .create_monster_instance(monster_id, name)
            .ok_or_else(|| CombatError::UnknownMonster(monster_id.to_string()))?;
        let combatant = Combatant::from_monster_instance(instance, category);
        let id = combatant.instance_id.clone();
        self.add_combatant(combatant)?;
        Ok(id)
    }

    /// Roll initiative and open round 1.
    ///
    /// Order is descending initiative; ties break to the higher DEX
    /// modifier, then to roster insertion order.
    pub fn begin_combat(&mut self, roller: &mut Roller) -> Result<(), CombatError> {
        if self.status != CombatStatus::NotStarted {
            return Err(CombatError::AlreadyStarted);
        }
        if self.combatants.len() < 2 {
            return Err(CombatError::NotEnoughCombatants);
        }

        for combatant in &mut self.combatants {
            let roll = roller.roll_initiative(combatant.dex_mod(), 0);
            combatant.initiative = roll.total;
        }

        let mut order: Vec<usize> = (0..self.combatants.len()).collect();
        order.sort_by(|&a, &b| {
            let lhs = &self.combatants[a];
            let rhs = &self.combatants[b];
            rhs.initiative
                .cmp(&lhs.initiative)
                .then(rhs.dex_mod().cmp(&lhs.dex_mod()))
                .then(a.cmp(&b))
        });
        self.initiative_order = order
            .into_iter()
            .map(|i| self.combatants[i].instance_id.clone())
            .collect();

        self.round = 1;
        self.turn_index = 0;
        self.status = CombatStatus::Ongoing;
        let first = self.initiative_order[0].clone();
        if let Some(combatant) = self.combatant_mut(&first) {
            combatant.turn_active = true;
            combatant.reset_turn();
        }
        info!(round = self.round, first = %first, "combat started");
        Ok(())
    }

    // ========================================================================
    // Turn flow
    // ========================================================================

    pub fn current_combatant(&self) -> Option<&Combatant> {
        if self.status != CombatStatus::Ongoing {
            return None;
        }
        let id = self.initiative_order.get(self.turn_index)?;
        self.combatants.iter().find(|c| &c.instance_id == id)
    }

    pub fn current_turn(&self) -> Option<TurnInfo> {
        self.current_combatant().map(|c| TurnInfo {
            instance_id: c.instance_id.clone(),
            name: c.name.clone(),
            round: self.round,
            turn_index: self.turn_index,
            economy: c.economy.clone(),
            movement_remaining: c.movement_remaining(),
        })
    }

    /// The scene the pipeline needs for the active combatant.
    pub fn scene_context(&self) -> Result<SceneContext, CombatError> {
        let actor = self
            .current_combatant()
            .ok_or(CombatError::NoActiveCombatant)?;

        let mut enemies = Vec::new();
        let mut allies = Vec::new();
        for other in &self.combatants {
            if other.instance_id == actor.instance_id || other.dead || other.unconscious {
                continue;
            }
            let hostile = match actor.category {
                CombatantCategory::Player | CombatantCategory::Ally => {
                    other.category == CombatantCategory::Enemy
                }
                CombatantCategory::Enemy => matches!(
                    other.category,
                    CombatantCategory::Player | CombatantCategory::Ally
                ),
                CombatantCategory::Neutral => false,
            };
            if hostile {
                enemies.push(other.as_ref());
            } else {
                allies.push(other.as_ref());
            }
        }

        let available_weapons: Vec<WeaponRef> = actor
            .primary_weapon
            .iter()
            .chain(actor.secondary_weapon.iter())
            .cloned()
            .collect();

        Ok(SceneContext {
            actor: actor.as_actor_profile(),
            primary_weapon: actor.primary_weapon.clone(),
            secondary_weapon: actor.secondary_weapon.clone(),
            available_weapons,
            known_spells: actor.known_spells.clone(),
            available_slots: actor.spell_slots.clone(),
            living_enemies: enemies,
            allies,
            movement_remaining: actor.movement_remaining(),
            action_available: !actor.economy.action_used,
            bonus_available: !actor.economy.bonus_used,
        })
    }

    /// Advance to the next living combatant. Wraps the order and bumps
    /// the round. Unconscious PCs keep their turn (death saves).
    pub fn end_turn(&mut self) -> Result<Option<TurnInfo>, CombatError> {
        if self.status != CombatStatus::Ongoing {
            return Err(CombatError::NotActive);
        }

        if let Some(current) = self.current_combatant().map(|c| c.instance_id.clone()) {
            if let Some(combatant) = self.combatant_mut(&current) {
                combatant.turn_active = false;
            }
        }

        for _ in 0..self.initiative_order.len() {
            self.turn_index += 1;
            if self.turn_index >= self.initiative_order.len() {
                self.turn_index = 0;
                self.round += 1;
            }
            let id = self.initiative_order[self.turn_index].clone();
            let alive = self
                .combatant(&id)
                .map(|c| c.is_alive())
                .unwrap_or(false);
            if alive {
                if let Some(combatant) = self.combatant_mut(&id) {
                    combatant.turn_active = true;
                    combatant.reset_turn();
                }
                debug!(round = self.round, active = %id, "turn advanced");
                return Ok(self.current_turn());
            }
        }

        // Nobody left standing.
        self.finish(CombatOutcome::Defeat);
        Ok(None)
    }

    // ========================================================================
    // Applying pipeline results
    // ========================================================================

    /// Apply an `Applied` pipeline outcome to the combat state.
    ///
    /// Returns the extra events the application itself produced
    /// (knock-outs, deaths, combat end). Re-applying the same delta in
    /// the same turn fails.
    pub fn apply_outcome(&mut self, outcome: &AppliedOutcome) -> Result<Vec<Event>, CombatError> {
        if self.status != CombatStatus::Ongoing {
            return Err(CombatError::NotActive);
        }
        let actor_id = self
            .current_combatant()
            .ok_or(CombatError::NoActiveCombatant)?
            .instance_id
            .clone();

        let payload = serde_json::to_string(&outcome.state_delta).unwrap_or_default();
        let guard_key = format!("{}:{}:{}:{}", self.round, self.turn_index, actor_id, payload);
        if !self.applied_deltas.insert(guard_key) {
            return Err(CombatError::DeltaAlreadyApplied);
        }

        let mut extra_events = Vec::new();
        self.apply_delta(&actor_id, &outcome.state_delta, &mut extra_events)?;

        for event in outcome.events.iter().chain(extra_events.iter()) {
            self.record_event(&actor_id, event.clone());
        }

        if let Some(outcome) = self.termination() {
            self.finish(outcome);
            let ended = Event::CombatEnded {
                outcome,
                round: self.round,
            };
            self.record_event(&actor_id, ended.clone());
            extra_events.push(ended);
        }

        Ok(extra_events)
    }

    fn apply_delta(
        &mut self,
        actor_id: &str,
        delta: &StateDelta,
        extra_events: &mut Vec<Event>,
    ) -> Result<(), CombatError> {
        // Economy first.
        {
            let actor = self
                .combatant_mut(actor_id)
                .ok_or_else(|| CombatError::UnknownCombatant(actor_id.to_string()))?;
            if delta.action_used {
                actor.economy.action_used = true;
            }
            if delta.bonus_action_used {
                actor.economy.bonus_used = true;
            }
            actor.economy.movement_used += delta.movement_used;
            actor.economy.bonus_movement += delta.bonus_movement;
            if let Some(level) = delta.slot_consumed {
                if let Some(remaining) = actor.spell_slots.get_mut(&level) {
                    *remaining = remaining.saturating_sub(1);
                }
            }
        }

        for change in &delta.conditions_added {
            let target = self
                .combatant_mut(&change.target_id)
                .ok_or_else(|| CombatError::UnknownCombatant(change.target_id.clone()))?;
            // Applying an existing condition is a no-op.
            target.conditions.insert(change.condition);
        }
        for change in &delta.conditions_removed {
            let target = self
                .combatant_mut(&change.target_id)
                .ok_or_else(|| CombatError::UnknownCombatant(change.target_id.clone()))?;
            target.conditions.remove(&change.condition);
        }

        for damage in &delta.damage {
            self.apply_damage(&damage.target_id, damage.amount, extra_events)?;
        }
        for healing in &delta.healing {
            self.apply_healing(&healing.target_id, healing.amount, extra_events)?;
        }

        Ok(())
    }

    /// Temporary HP absorbs first; `hp_current` floors at 0. A player
    /// character drops unconscious and starts death saves; anything
    /// else dies.
    fn apply_damage(
        &mut self,
        target_id: &str,
        amount: i32,
        extra_events: &mut Vec<Event>,
    ) -> Result<(), CombatError> {
        let target = self
            .combatant_mut(target_id)
            .ok_or_else(|| CombatError::UnknownCombatant(target_id.to_string()))?;
        if target.dead || amount <= 0 {
            return Ok(());
        }

        let mut remaining = amount;
        if target.hp_temp > 0 {
            let absorbed = target.hp_temp.min(remaining);
            target.hp_temp -= absorbed;
            remaining -= absorbed;
        }
        target.hp_current = (target.hp_current - remaining).max(0);

        if target.hp_current == 0 {
            if target.category == CombatantCategory::Player {
                if !target.unconscious {
                    target.unconscious = true;
                    target.stable = false;
                    target.death_saves.reset();
                    target.conditions.insert(Condition::Unconscious);
                    extra_events.push(Event::ConditionApplied {
                        target_id: target.instance_id.clone(),
                        condition: Condition::Unconscious,
                        source: "daño".to_string(),
                    });
                }
            } else {
                target.dead = true;
                extra_events.push(Event::CombatantDown {
                    target_id: target.instance_id.clone(),
                    name: target.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn apply_healing(
        &mut self,
        target_id: &str,
        amount: i32,
        extra_events: &mut Vec<Event>,
    ) -> Result<(), CombatError> {
        let target = self
            .combatant_mut(target_id)
            .ok_or_else(|| CombatError::UnknownCombatant(target_id.to_string()))?;
        if target.dead || amount <= 0 {
            return Ok(());
        }

        target.hp_current = (target.hp_current + amount).min(target.hp_max);
        if target.unconscious && target.hp_current > 0 {
            target.unconscious = false;
            target.stable = false;
            target.death_saves.reset();
            target.conditions.remove(&Condition::Unconscious);
            extra_events.push(Event::ConditionRemoved {
                target_id: target.instance_id.clone(),
                condition: Condition::Unconscious,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Death saves
    // ========================================================================

    /// Roll a death save for the active combatant (an unconscious,
    /// unstable player character).
    ///
    /// 1 counts as two failures; 20 brings the character back with
    /// 1 HP; 2-9 fail; 10-19 succeed. Three successes stabilize,
    /// three failures kill.
    pub fn roll_death_save(&mut self, roller: &mut Roller) -> Result<DeathSaveOutcome, CombatError> {
        if self.status != CombatStatus::Ongoing {
            return Err(CombatError::NotActive);
        }
        let actor_id = {
            let actor = self
                .current_combatant()
                .ok_or(CombatError::NoActiveCombatant)?;
            if actor.category != CombatantCategory::Player
                || !actor.unconscious
                || actor.stable
                || actor.dead
            {
                return Err(CombatError::NotDying);
            }
            actor.instance_id.clone()
        };

        let roll = roller.roll_save(0, crate::dice::RollMode::Normal);
        let natural = roll.dice.first().copied().unwrap_or(0) as i32;

        let mut events = Vec::new();
        let outcome = {
            let actor = self
                .combatant_mut(&actor_id)
                .ok_or_else(|| CombatError::UnknownCombatant(actor_id.clone()))?;

            let mut revived = false;
            match natural {
                20 => {
                    actor.hp_current = 1;
                    actor.unconscious = false;
                    actor.stable = false;
                    actor.death_saves.reset();
                    actor.conditions.remove(&Condition::Unconscious);
                    revived = true;
                    events.push(Event::ConditionRemoved {
                        target_id: actor.instance_id.clone(),
                        condition: Condition::Unconscious,
                    });
                }
                1 => {
                    actor.death_saves.add_failures(2);
                }
                2..=9 => {
                    actor.death_saves.add_failures(1);
                }
                _ => {
                    actor.death_saves.add_success();
                }
            }

            if actor.death_saves.failures >= 3 {
                actor.dead = true;
                events.push(Event::CombatantDown {
                    target_id: actor.instance_id.clone(),
                    name: actor.name.clone(),
                });
            } else if actor.death_saves.successes >= 3 {
                actor.stable = true;
            }

            DeathSaveOutcome {
                roll: natural,
                successes: actor.death_saves.successes,
                failures: actor.death_saves.failures,
                stable: actor.stable,
                dead: actor.dead,
                revived,
            }
        };

        for event in events {
            self.record_event(&actor_id, event);
        }
        if let Some(end) = self.termination() {
            self.finish(end);
            let ended = Event::CombatEnded {
                outcome: end,
                round: self.round,
            };
            self.record_event(&actor_id, ended);
        }

        Ok(outcome)
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// The active combatant breaks away. Needs to be able to act and
    /// not be held in place.
    pub fn attempt_flee(&mut self) -> Result<bool, CombatError> {
        if self.status != CombatStatus::Ongoing {
            return Err(CombatError::NotActive);
        }
        let actor = self
            .current_combatant()
            .ok_or(CombatError::NoActiveCombatant)?;
        let held = actor.conditions.contains(&Condition::Grappled)
            || actor.conditions.contains(&Condition::Restrained);
        if !actor.can_act() || held {
            return Ok(false);
        }
        let actor_id = actor.instance_id.clone();
        self.finish(CombatOutcome::Fled);
        let event = Event::CombatEnded {
            outcome: CombatOutcome::Fled,
            round: self.round,
        };
        self.record_event(&actor_id, event);
        Ok(true)
    }

    /// End the combat explicitly and produce the summary.
    pub fn end_combat(&mut self, outcome: CombatOutcome) -> CombatSummary {
        if self.status == CombatStatus::Ongoing {
            self.finish(outcome);
            let actor_id = self
                .initiative_order
                .get(self.turn_index)
                .cloned()
                .unwrap_or_default();
            let event = Event::CombatEnded {
                outcome,
                round: self.round,
            };
            self.record_event(&actor_id, event);
        }
        self.summary_for(outcome)
    }

    /// Exactly one of victory / defeat / flee / ongoing holds after
    /// every applied action; `None` means ongoing.
    fn termination(&self) -> Option<CombatOutcome> {
        if let CombatStatus::Finished { outcome } = self.status {
            return Some(outcome);
        }

        let standing = |c: &Combatant| !c.dead && !c.unconscious;
        let players_up = self
            .combatants
            .iter()
            .filter(|c| c.category == CombatantCategory::Player && standing(c))
            .count();
        let enemies_up = self
            .combatants
            .iter()
            .filter(|c| c.category == CombatantCategory::Enemy && standing(c))
            .count();

        if enemies_up == 0 && players_up > 0 {
            Some(CombatOutcome::Victory)
        } else if players_up == 0 {
            Some(CombatOutcome::Defeat)
        } else {
            None
        }
    }

    fn finish(&mut self, outcome: CombatOutcome) {
        if self.status == CombatStatus::Ongoing {
            info!(?outcome, round = self.round, "combat finished");
            self.status = CombatStatus::Finished { outcome };
            for combatant in &mut self.combatants {
                combatant.turn_active = false;
            }
        }
    }

    fn summary_for(&self, outcome: CombatOutcome) -> CombatSummary {
        let xp_total = self
            .combatants
            .iter()
            .filter(|c| c.category == CombatantCategory::Enemy && c.dead)
            .map(|c| c.xp)
            .sum();
        CombatSummary {
            outcome,
            rounds: self.round,
            xp_total,
            survivors: self
                .combatants
                .iter()
                .filter(|c| c.is_alive())
                .map(|c| c.instance_id.clone())
                .collect(),
            dead: self
                .combatants
                .iter()
                .filter(|c| c.dead)
                .map(|c| c.instance_id.clone())
                .collect(),
        }
    }

    /// The summary, once the combat is over.
    pub fn summary(&self) -> Option<CombatSummary> {
        match self.status {
            CombatStatus::Finished { outcome } => Some(self.summary_for(outcome)),
            _ => None,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self) -> CombatStatus {
        self.status
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn initiative_order(&self) -> &[String] {
        &self.initiative_order
    }

    pub fn combatant(&self, id: &str) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.instance_id == id)
    }

    /// Direct mutable access, for setup and tooling. In-game mutation
    /// flows through `apply_outcome`.
    pub fn combatant_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.combatants.iter_mut().find(|c| c.instance_id == id)
    }

    /// All combatants in initiative order (roster order before the
    /// combat starts).
    pub fn combatants(&self) -> Vec<&Combatant> {
        if self.initiative_order.is_empty() {
            self.combatants.iter().collect()
        } else {
            self.initiative_order
                .iter()
                .filter_map(|id| self.combatant(id))
                .collect()
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    fn record_event(&mut self, actor_id: &str, event: Event) {
        let event_index = self
            .history
            .iter()
            .filter(|entry| entry.round == self.round && entry.turn_index == self.turn_index)
            .count();
        self.history.push(HistoryEntry {
            round: self.round,
            turn_index: self.turn_index,
            event_index,
            actor_id: actor_id.to_string(),
            event,
            recorded_at: Utc::now(),
        });
    }
}

impl Default for CombatManager {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}
