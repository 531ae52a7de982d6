//! The turn pipeline: player text in, tagged result out.
//!
//! normalize → clarify? → validate → execute → narrate. The pipeline
//! never mutates combat state; it returns events plus a [`StateDelta`]
//! for the combat manager to apply. Rejections and clarification
//! requests leave everything untouched and do not consume the turn.

use crate::compendium::{Compendium, ItemEffect, MonsterAction, SpellAttackKind};
use crate::dice::{resolve_attack_roll, RollMode, RollResult, Roller};
use crate::narrator::{NarrationAdapter, NarrationContext, Narrator};
use crate::normalizer::{
    ActionData, AttackSubtype, CanonicalAction, CombatantRef, NormalizeError, Normalizer,
    NormalizerFallback, SceneContext,
};
use crate::rules::{Ability, Condition, DamageType, Skill};
use crate::validator::{ErrorCode, Validation, Validator};
use crate::vocabulary::GenericActionId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// Events
// ============================================================================

/// How a combat ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatOutcome {
    Victory,
    Defeat,
    Fled,
}

/// A saving throw resolved as part of a spell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellSaveOutcome {
    pub ability: Ability,
    pub dc: i32,
    pub roll: RollResult,
    pub success: bool,
}

/// Structured record of something that happened during a turn.
///
/// Events are the system's currency: the narrator reads them, the
/// history stores them. Emission order within a result is fixed:
/// roll → hit/miss → damage → condition → combatant down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    AttackRolled {
        actor_id: String,
        target_id: String,
        /// Weapon or stat-block action name.
        weapon: String,
        roll: RollResult,
        target_ac: i32,
        hit: bool,
        critical: bool,
        fumble: bool,
    },
    DamageDealt {
        actor_id: String,
        target_id: String,
        amount: i32,
        damage_type: DamageType,
        roll: Option<RollResult>,
    },
    Miss {
        actor_id: String,
        target_id: String,
    },
    SpellCast {
        actor_id: String,
        target_id: Option<String>,
        spell_id: String,
        name: String,
        casting_level: u8,
        save: Option<SpellSaveOutcome>,
    },
    SlotConsumed {
        actor_id: String,
        level: u8,
    },
    MoveResolved {
        actor_id: String,
        distance_feet: u32,
        destination: Option<String>,
        movement_remaining: u32,
    },
    SkillChecked {
        actor_id: String,
        skill: Skill,
        roll: RollResult,
        /// DC is left to the caller to adjudicate.
        target_id: Option<String>,
    },
    GenericActionTaken {
        actor_id: String,
        action_id: GenericActionId,
    },
    ConditionApplied {
        target_id: String,
        condition: Condition,
        source: String,
    },
    ConditionRemoved {
        target_id: String,
        condition: Condition,
    },
    HealingReceived {
        target_id: String,
        amount: i32,
        roll: Option<RollResult>,
        source: String,
    },
    CombatantDown {
        target_id: String,
        name: String,
    },
    CombatEnded {
        outcome: CombatOutcome,
        round: u32,
    },
}

// ============================================================================
// State delta
// ============================================================================

/// Damage bound for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageApplied {
    pub target_id: String,
    pub amount: i32,
    pub damage_type: DamageType,
}

/// Healing bound for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingApplied {
    pub target_id: String,
    pub amount: i32,
}

/// A condition gained or lost by one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionChange {
    pub target_id: String,
    pub condition: Condition,
}

/// Everything an applied action changes, for the combat manager to
/// apply. The pipeline itself touches nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub damage: Vec<DamageApplied>,
    pub healing: Vec<HealingApplied>,
    /// Slot level consumed by the acting caster.
    pub slot_consumed: Option<u8>,
    pub movement_used: u32,
    /// Extra movement granted this turn (Dash).
    pub bonus_movement: u32,
    pub conditions_added: Vec<ConditionChange>,
    pub conditions_removed: Vec<ConditionChange>,
    pub action_used: bool,
    pub bonus_action_used: bool,
    /// Item whose charge/use was consumed.
    pub item_used: Option<String>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self == &StateDelta::default()
    }
}

// ============================================================================
// Results
// ============================================================================

/// One selectable answer to a clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub id: String,
    pub text: String,
}

/// The payload of a successfully applied action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOutcome {
    pub events: Vec<Event>,
    pub state_delta: StateDelta,
    pub narration: Option<String>,
    pub warnings: Vec<String>,
    pub action: CanonicalAction,
}

/// What `process` hands back for every player utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineResult {
    /// The action is too ambiguous to run; the turn is not consumed.
    NeedsClarification {
        question: String,
        options: Vec<ClarificationOption>,
        action: CanonicalAction,
    },
    /// The rules forbid the action; the turn is not consumed.
    Rejected {
        code: ErrorCode,
        reason: String,
        suggestion: Option<String>,
        action: Option<CanonicalAction>,
    },
    /// The action ran; apply the delta through the combat manager.
    Applied(AppliedOutcome),
}

// ============================================================================
// Pipeline
// ============================================================================

/// Orchestrates one player action from text to events.
pub struct TurnPipeline<'a> {
    compendium: &'a Compendium,
    fallback: Option<&'a dyn NormalizerFallback>,
    narrator: Option<&'a dyn Narrator>,
    strict_equipment: bool,
}

impl<'a> TurnPipeline<'a> {
    pub fn new(compendium: &'a Compendium) -> Self {
        Self {
            compendium,
            fallback: None,
            narrator: None,
            strict_equipment: false,
        }
    }

    /// Inject the normalizer's LLM fallback.
    pub fn with_fallback(mut self, fallback: &'a dyn NormalizerFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Inject the narrator.
    pub fn with_narrator(mut self, narrator: &'a dyn Narrator) -> Self {
        self.narrator = Some(narrator);
        self
    }

    /// Refuse attacks with unequipped weapons instead of warning.
    pub fn with_strict_equipment(mut self, strict: bool) -> Self {
        self.strict_equipment = strict;
        self
    }

    /// Process one player utterance against the current scene.
    pub fn process(
        &self,
        player_text: &str,
        scene: &SceneContext,
        roller: &mut Roller,
    ) -> PipelineResult {
        // Step 1: normalize.
        let normalizer = match self.fallback {
            Some(fallback) => Normalizer::with_fallback(self.compendium, fallback),
            None => Normalizer::new(self.compendium),
        };
        let action = match normalizer.normalize(player_text, scene) {
            Ok(action) => action,
            Err(NormalizeError::InvalidInput) => {
                return PipelineResult::Rejected {
                    code: ErrorCode::Internal,
                    reason: "Texto de acción vacío".to_string(),
                    suggestion: Some("Describe qué quieres hacer".to_string()),
                    action: None,
                }
            }
        };

        // Step 2: clarification short-circuit.
        if action.needs_clarification {
            return self.build_clarification(action, scene);
        }

        // Step 3: validate.
        let validation = self.validate(&action, scene);
        if !validation.valid {
            let code = validation.code.unwrap_or(ErrorCode::Internal);
            let suggestion = suggest(code, &validation.reason, scene);
            debug!(%code, reason = %validation.reason, "action rejected");
            return PipelineResult::Rejected {
                code,
                reason: validation.reason,
                suggestion,
                action: Some(action),
            };
        }

        // Step 4: execute.
        let mut warnings = action.warnings.clone();
        warnings.extend(validation.warnings.iter().cloned());
        let (events, state_delta) = match self.execute(&action, scene, roller) {
            Ok(result) => result,
            Err(reason) => {
                warn!(%reason, "internal execution failure");
                return PipelineResult::Rejected {
                    code: ErrorCode::Internal,
                    reason,
                    suggestion: None,
                    action: Some(action),
                };
            }
        };

        // Step 5: narrate, best effort.
        let adapter = NarrationAdapter::new(self.narrator);
        let context = NarrationContext::from_scene(scene);
        let narration = adapter.narrate(&events, &context);
        if let Some(warning) = narration.warning {
            warnings.push(warning);
        }

        PipelineResult::Applied(AppliedOutcome {
            events,
            state_delta,
            narration: Some(narration.text),
            warnings,
            action,
        })
    }

    fn validate(&self, action: &CanonicalAction, scene: &SceneContext) -> Validation {
        let validator = Validator::with_strict_equipment(self.compendium, self.strict_equipment);
        let actor = &scene.actor;

        match &action.data {
            ActionData::Attack {
                target_id,
                weapon_id,
                ..
            } => {
                let target = target_id.as_deref().and_then(|id| find_combatant(scene, id));
                validator.validate_attack(actor, target, weapon_id.as_deref())
            }
            ActionData::Spell {
                target_id,
                spell_id,
                casting_level,
                ..
            } => {
                let target = target_id.as_deref().and_then(|id| find_combatant(scene, id));
                // spell_id is critical, so it is present here.
                let spell_id = spell_id.as_deref().unwrap_or_default();
                validator.validate_spell(actor, spell_id, *casting_level, target)
            }
            ActionData::Move { distance_feet, .. } => validator.validate_move(
                actor,
                distance_feet.unwrap_or(0),
                scene.movement_remaining,
            ),
            ActionData::Skill { skill, .. } => match skill {
                Some(skill) => validator.validate_skill(actor, *skill),
                None => Validation::fail(ErrorCode::InvalidSkill, "Habilidad no reconocida"),
            },
            ActionData::GenericAction { action_id, .. } => match action_id {
                Some(action_id) => validator.validate_generic(actor, *action_id),
                None => Validation::fail(ErrorCode::Internal, "Acción genérica sin identificar"),
            },
            ActionData::UseItem { item_id, .. } => {
                validator.validate_use_item(actor, item_id.as_deref().unwrap_or_default())
            }
            ActionData::Unknown { .. } => {
                Validation::fail(ErrorCode::Internal, "Acción no reconocida")
            }
        }
    }

    /// Deterministic execution. Events come out in documented order.
    fn execute(
        &self,
        action: &CanonicalAction,
        scene: &SceneContext,
        roller: &mut Roller,
    ) -> Result<(Vec<Event>, StateDelta), String> {
        match &action.data {
            ActionData::Attack {
                attacker_id,
                target_id,
                weapon_id,
                subtype,
                mode,
            } => self.execute_attack(
                scene,
                roller,
                attacker_id,
                target_id.as_deref(),
                weapon_id.as_deref(),
                *subtype,
                *mode,
            ),
            ActionData::Spell {
                caster_id,
                target_id,
                spell_id,
                casting_level,
            } => self.execute_spell(
                scene,
                roller,
                caster_id,
                target_id.as_deref(),
                spell_id.as_deref(),
                casting_level.unwrap_or(0),
            ),
            ActionData::Move {
                actor_id,
                distance_feet,
                destination,
            } => {
                let distance = distance_feet.unwrap_or(0);
                let remaining = scene.movement_remaining.saturating_sub(distance);
                let events = vec![Event::MoveResolved {
                    actor_id: actor_id.clone(),
                    distance_feet: distance,
                    destination: destination.clone(),
                    movement_remaining: remaining,
                }];
                let delta = StateDelta {
                    movement_used: distance,
                    ..StateDelta::default()
                };
                Ok((events, delta))
            }
            ActionData::Skill {
                actor_id,
                skill,
                target_id,
            } => {
                let skill = skill.ok_or("skill missing after validation")?;
                let bonus = scene
                    .actor
                    .skill_bonuses
                    .get(skill.key())
                    .copied()
                    .unwrap_or_else(|| scene.actor.abilities.modifier(skill.ability()));
                let roll = roller.roll_skill(bonus, RollMode::Normal);
                let events = vec![Event::SkillChecked {
                    actor_id: actor_id.clone(),
                    skill,
                    roll,
                    target_id: target_id.clone(),
                }];
                Ok((events, StateDelta::default()))
            }
            ActionData::GenericAction {
                actor_id,
                action_id,
            } => {
                let action_id = action_id.ok_or("generic action missing after validation")?;
                let mut events = vec![Event::GenericActionTaken {
                    actor_id: actor_id.clone(),
                    action_id,
                }];
                let mut delta = StateDelta {
                    action_used: true,
                    ..StateDelta::default()
                };
                match action_id {
                    GenericActionId::Dash => {
                        delta.bonus_movement = scene.actor.speed;
                    }
                    GenericActionId::Dodge => {
                        events.push(Event::ConditionApplied {
                            target_id: actor_id.clone(),
                            condition: Condition::Dodging,
                            source: "dodge".to_string(),
                        });
                        delta.conditions_added.push(ConditionChange {
                            target_id: actor_id.clone(),
                            condition: Condition::Dodging,
                        });
                    }
                    _ => {}
                }
                Ok((events, delta))
            }
            ActionData::UseItem { actor_id, item_id } => {
                let item_id = item_id.as_deref().ok_or("item missing after validation")?;
                self.execute_item(scene, roller, actor_id, item_id)
            }
            ActionData::Unknown { .. } => Err("unknown action reached execution".to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_attack(
        &self,
        scene: &SceneContext,
        roller: &mut Roller,
        attacker_id: &str,
        target_id: Option<&str>,
        weapon_id: Option<&str>,
        subtype: AttackSubtype,
        mode: RollMode,
    ) -> Result<(Vec<Event>, StateDelta), String> {
        let target_id = target_id.ok_or("attack without target after validation")?;
        let target = find_combatant(scene, target_id)
            .ok_or_else(|| format!("target '{target_id}' vanished from the scene"))?;

        let profile = self.attack_profile(scene, weapon_id, subtype)?;
        let roll = roller.roll_attack(profile.attack_bonus, mode);
        let outcome = resolve_attack_roll(&roll, target.armor_class);

        let mut events = vec![Event::AttackRolled {
            actor_id: attacker_id.to_string(),
            target_id: target_id.to_string(),
            weapon: profile.name.clone(),
            roll,
            target_ac: target.armor_class,
            hit: outcome.hits,
            critical: outcome.critical,
            fumble: outcome.fumble,
        }];
        let mut delta = StateDelta {
            action_used: true,
            ..StateDelta::default()
        };

        if !outcome.hits {
            events.push(Event::Miss {
                actor_id: attacker_id.to_string(),
                target_id: target_id.to_string(),
            });
            return Ok((events, delta));
        }

        let (amount, damage_roll) = match &profile.damage {
            AttackDamage::Expression(expr) => {
                let roll = roller
                    .roll_damage(expr, outcome.critical)
                    .map_err(|e| format!("bad damage expression '{expr}': {e}"))?;
                (roll.total.max(0), Some(roll))
            }
            AttackDamage::Flat(amount) => (*amount, None),
        };

        events.push(Event::DamageDealt {
            actor_id: attacker_id.to_string(),
            target_id: target_id.to_string(),
            amount,
            damage_type: profile.damage_type,
            roll: damage_roll,
        });
        delta.damage.push(DamageApplied {
            target_id: target_id.to_string(),
            amount,
            damage_type: profile.damage_type,
        });

        Ok((events, delta))
    }

    /// Where the attack numbers come from: a stat-block action when the
    /// actor has one, the named weapon otherwise, bare fists as the
    /// last resort.
    fn attack_profile(
        &self,
        scene: &SceneContext,
        weapon_id: Option<&str>,
        subtype: AttackSubtype,
    ) -> Result<AttackProfile, String> {
        let actor = &scene.actor;

        if !actor.monster_actions.is_empty() {
            let action = pick_monster_action(&actor.monster_actions, weapon_id);
            if let Some(action) = action {
                return Ok(AttackProfile {
                    name: action.name.clone(),
                    attack_bonus: action.attack_bonus.unwrap_or(0),
                    damage: AttackDamage::Expression(
                        action.damage.clone().unwrap_or_else(|| "1d4".to_string()),
                    ),
                    damage_type: action.damage_type.unwrap_or(DamageType::Bludgeoning),
                });
            }
        }

        let str_mod = actor.abilities.modifier(Ability::Strength);
        let dex_mod = actor.abilities.modifier(Ability::Dexterity);

        match weapon_id {
            Some("unarmed") | None => Ok(AttackProfile {
                name: "ataque desarmado".to_string(),
                attack_bonus: str_mod + actor.proficiency_bonus,
                damage: AttackDamage::Flat((1 + str_mod).max(1)),
                damage_type: DamageType::Bludgeoning,
            }),
            Some(weapon_id) => {
                let weapon = self
                    .compendium
                    .weapon(weapon_id)
                    .ok_or_else(|| format!("weapon '{weapon_id}' vanished from the compendium"))?;
                let ranged = weapon.is_ranged() || subtype == AttackSubtype::Ranged;
                let ability_mod = if ranged {
                    dex_mod
                } else if weapon.is_finesse() {
                    str_mod.max(dex_mod)
                } else {
                    str_mod
                };
                Ok(AttackProfile {
                    name: weapon.name.clone(),
                    attack_bonus: ability_mod + actor.proficiency_bonus,
                    damage: AttackDamage::Expression(damage_expr(&weapon.damage, ability_mod)),
                    damage_type: weapon.damage_type,
                })
            }
        }
    }

    fn execute_spell(
        &self,
        scene: &SceneContext,
        roller: &mut Roller,
        caster_id: &str,
        target_id: Option<&str>,
        spell_id: Option<&str>,
        casting_level: u8,
    ) -> Result<(Vec<Event>, StateDelta), String> {
        let spell_id = spell_id.ok_or("spell without id after validation")?;
        let spell = self
            .compendium
            .spell(spell_id)
            .ok_or_else(|| format!("spell '{spell_id}' vanished from the compendium"))?;
        let actor = &scene.actor;

        let mut events = Vec::new();
        let mut delta = StateDelta {
            action_used: true,
            ..StateDelta::default()
        };

        // Leveled spells burn the slot first. Upcasting burns the
        // higher slot without scaling the effect yet.
        let effective_level = if spell.is_cantrip() {
            0
        } else {
            casting_level.max(spell.level)
        };
        if !spell.is_cantrip() {
            delta.slot_consumed = Some(effective_level);
            events.push(Event::SlotConsumed {
                actor_id: caster_id.to_string(),
                level: effective_level,
            });
        }

        let mut target = target_id.and_then(|id| find_combatant(scene, id));
        // A targeted spell with nobody named adopts the only enemy up.
        if target.is_none() && spell.requires_target() {
            if let [only] = scene.living_enemies.as_slice() {
                target = Some(only);
            }
        }

        // Damage resolution per the spell record. A damaging spell
        // that still has no target resolves as cast-only text.
        let needs_roll_target = spell.attack.is_some() || spell.save.is_some();
        let resolvable = target.is_some() || !needs_roll_target;
        let mut save_outcome = None;
        let mut damage_events = Vec::new();
        if let (Some(damage_expr), true) = (&spell.damage, resolvable) {
            let damage_type = spell.damage_type.unwrap_or(DamageType::Force);

            if let Some(attack_kind) = spell.attack {
                let target =
                    target.ok_or("attack spell without target after validation".to_string())?;
                let bonus = actor
                    .spell_attack_bonus
                    .unwrap_or(actor.proficiency_bonus);
                let roll = roller.roll_attack(bonus, RollMode::Normal);
                let outcome = resolve_attack_roll(&roll, target.armor_class);
                damage_events.push(Event::AttackRolled {
                    actor_id: caster_id.to_string(),
                    target_id: target.instance_id.clone(),
                    weapon: format!(
                        "{} ({})",
                        spell.name,
                        match attack_kind {
                            SpellAttackKind::Melee => "toque",
                            SpellAttackKind::Ranged => "rayo",
                        }
                    ),
                    roll,
                    target_ac: target.armor_class,
                    hit: outcome.hits,
                    critical: outcome.critical,
                    fumble: outcome.fumble,
                });
                if outcome.hits {
                    let roll = roller
                        .roll_damage(damage_expr, outcome.critical)
                        .map_err(|e| format!("bad spell damage '{damage_expr}': {e}"))?;
                    let amount = roll.total.max(0);
                    damage_events.push(Event::DamageDealt {
                        actor_id: caster_id.to_string(),
                        target_id: target.instance_id.clone(),
                        amount,
                        damage_type,
                        roll: Some(roll),
                    });
                    delta.damage.push(DamageApplied {
                        target_id: target.instance_id.clone(),
                        amount,
                        damage_type,
                    });
                } else {
                    damage_events.push(Event::Miss {
                        actor_id: caster_id.to_string(),
                        target_id: target.instance_id.clone(),
                    });
                }
            } else if let Some(save_ability) = spell.save {
                // Target saves against the caster's DC.
                let target =
                    target.ok_or("save spell without target after validation".to_string())?;
                let dc = actor.spell_save_dc.unwrap_or(8 + actor.proficiency_bonus);
                let save_bonus = target
                    .abilities
                    .as_ref()
                    .map(|a| a.modifier(save_ability))
                    .unwrap_or(0);
                let roll = roller.roll_save(save_bonus, RollMode::Normal);
                let success = roll.meets_dc(dc);
                save_outcome = Some(SpellSaveOutcome {
                    ability: save_ability,
                    dc,
                    roll,
                    success,
                });

                let full = roller
                    .roll_damage(damage_expr, false)
                    .map_err(|e| format!("bad spell damage '{damage_expr}': {e}"))?;
                let amount = if success {
                    if spell.half_on_save {
                        full.total / 2
                    } else {
                        0
                    }
                } else {
                    full.total
                };
                if amount > 0 {
                    damage_events.push(Event::DamageDealt {
                        actor_id: caster_id.to_string(),
                        target_id: target.instance_id.clone(),
                        amount,
                        damage_type,
                        roll: Some(full),
                    });
                    delta.damage.push(DamageApplied {
                        target_id: target.instance_id.clone(),
                        amount,
                        damage_type,
                    });
                }
            } else if let Some(target) = target {
                // No attack, no save (magic missile): it just hits.
                let roll = roller
                    .roll_damage(damage_expr, false)
                    .map_err(|e| format!("bad spell damage '{damage_expr}': {e}"))?;
                let amount = roll.total.max(0);
                damage_events.push(Event::DamageDealt {
                    actor_id: caster_id.to_string(),
                    target_id: target.instance_id.clone(),
                    amount,
                    damage_type,
                    roll: Some(roll),
                });
                delta.damage.push(DamageApplied {
                    target_id: target.instance_id.clone(),
                    amount,
                    damage_type,
                });
            }
        }
        // Spells beyond the structured surface (utility text) emit the
        // cast event only.

        events.push(Event::SpellCast {
            actor_id: caster_id.to_string(),
            target_id: target.map(|t| t.instance_id.clone()),
            spell_id: spell_id.to_string(),
            name: spell.name.clone(),
            casting_level: effective_level,
            save: save_outcome,
        });
        events.extend(damage_events);

        Ok((events, delta))
    }

    fn execute_item(
        &self,
        scene: &SceneContext,
        roller: &mut Roller,
        actor_id: &str,
        item_id: &str,
    ) -> Result<(Vec<Event>, StateDelta), String> {
        let item = self
            .compendium
            .item(item_id)
            .ok_or_else(|| format!("item '{item_id}' vanished from the compendium"))?;

        let mut events = Vec::new();
        let mut delta = StateDelta {
            action_used: true,
            item_used: Some(item_id.to_string()),
            ..StateDelta::default()
        };

        match &item.effect {
            Some(ItemEffect::Healing { amount }) => {
                let roll = roller
                    .roll_damage(amount, false)
                    .map_err(|e| format!("bad healing expression '{amount}': {e}"))?;
                let healed = roll.total.max(0);
                events.push(Event::HealingReceived {
                    target_id: actor_id.to_string(),
                    amount: healed,
                    roll: Some(roll),
                    source: item.name.clone(),
                });
                delta.healing.push(HealingApplied {
                    target_id: actor_id.to_string(),
                    amount: healed,
                });
            }
            Some(ItemEffect::Damage {
                amount,
                damage_type,
            }) => {
                // Without an explicit target the item flies at the only
                // living enemy; anything else is ambiguous.
                if let [enemy] = scene.living_enemies.as_slice() {
                    let roll = roller
                        .roll_damage(amount, false)
                        .map_err(|e| format!("bad item damage '{amount}': {e}"))?;
                    let dealt = roll.total.max(0);
                    events.push(Event::DamageDealt {
                        actor_id: actor_id.to_string(),
                        target_id: enemy.instance_id.clone(),
                        amount: dealt,
                        damage_type: *damage_type,
                        roll: Some(roll),
                    });
                    delta.damage.push(DamageApplied {
                        target_id: enemy.instance_id.clone(),
                        amount: dealt,
                        damage_type: *damage_type,
                    });
                }
            }
            Some(ItemEffect::ApplyCondition { condition }) => {
                events.push(Event::ConditionApplied {
                    target_id: actor_id.to_string(),
                    condition: *condition,
                    source: item.name.clone(),
                });
                delta.conditions_added.push(ConditionChange {
                    target_id: actor_id.to_string(),
                    condition: *condition,
                });
            }
            None => {}
        }

        Ok((events, delta))
    }

    fn build_clarification(
        &self,
        action: CanonicalAction,
        scene: &SceneContext,
    ) -> PipelineResult {
        let mut question = String::new();
        let mut options = Vec::new();

        match &action.data {
            ActionData::Attack { .. } => {
                if action.missing_fields.iter().any(|f| f == "target_id") {
                    question = "¿A quién quieres atacar?".to_string();
                    for enemy in &scene.living_enemies {
                        options.push(ClarificationOption {
                            id: enemy.instance_id.clone(),
                            text: enemy.name.clone(),
                        });
                    }
                } else if action.missing_fields.iter().any(|f| f == "weapon_id") {
                    question = "¿Con qué arma quieres atacar?".to_string();
                    for weapon in &scene.available_weapons {
                        options.push(ClarificationOption {
                            id: weapon.id.clone(),
                            text: weapon.name.clone(),
                        });
                    }
                    options.push(ClarificationOption {
                        id: "unarmed".to_string(),
                        text: "Ataque desarmado".to_string(),
                    });
                }
            }
            ActionData::Spell { .. } => {
                question = "¿Qué conjuro quieres lanzar?".to_string();
                for spell in &scene.known_spells {
                    options.push(ClarificationOption {
                        id: spell.id.clone(),
                        text: spell.name.clone(),
                    });
                }
            }
            ActionData::Skill { .. } => {
                question = "¿Qué habilidad quieres usar?".to_string();
                for skill in [
                    Skill::Perception,
                    Skill::Stealth,
                    Skill::Athletics,
                    Skill::Acrobatics,
                    Skill::Investigation,
                    Skill::Persuasion,
                    Skill::Deception,
                    Skill::Intimidation,
                ] {
                    options.push(ClarificationOption {
                        id: skill.key().to_string(),
                        text: skill.key().to_string(),
                    });
                }
            }
            ActionData::Move { .. } => {
                question = "¿Cuántos pies quieres moverte?".to_string();
                for distance in [5u32, 10, 15, 20, 25, 30] {
                    if distance <= scene.movement_remaining {
                        options.push(ClarificationOption {
                            id: distance.to_string(),
                            text: format!("{distance} pies"),
                        });
                    }
                }
            }
            ActionData::UseItem { .. } => {
                question = "¿Qué objeto quieres usar?".to_string();
                for item in self.compendium.items() {
                    options.push(ClarificationOption {
                        id: item.id.clone(),
                        text: item.name.clone(),
                    });
                }
            }
            ActionData::GenericAction { .. } | ActionData::Unknown { .. } => {}
        }

        if question.is_empty() {
            question = "No entendí tu acción. ¿Qué quieres hacer?".to_string();
            options = vec![
                ClarificationOption {
                    id: "atacar".to_string(),
                    text: "Atacar a un enemigo".to_string(),
                },
                ClarificationOption {
                    id: "conjuro".to_string(),
                    text: "Lanzar un conjuro".to_string(),
                },
                ClarificationOption {
                    id: "mover".to_string(),
                    text: "Moverme".to_string(),
                },
                ClarificationOption {
                    id: "habilidad".to_string(),
                    text: "Usar una habilidad".to_string(),
                },
            ];
        }

        PipelineResult::NeedsClarification {
            question,
            options,
            action,
        }
    }
}

/// One resolved source of attack numbers.
struct AttackProfile {
    name: String,
    attack_bonus: i32,
    damage: AttackDamage,
    damage_type: DamageType,
}

enum AttackDamage {
    Expression(String),
    Flat(i32),
}

/// Prefer a stat-block action matching the asked weapon; fall back to
/// the first melee attack, then any attack.
fn pick_monster_action<'m>(
    actions: &'m [MonsterAction],
    weapon_id: Option<&str>,
) -> Option<&'m MonsterAction> {
    let attacks: Vec<&MonsterAction> = actions.iter().filter(|a| a.is_attack()).collect();
    if attacks.is_empty() {
        return None;
    }

    if let Some(weapon_id) = weapon_id.filter(|id| *id != "unarmed") {
        if let Some(named) = attacks
            .iter()
            .find(|a| normalize_action_name(&a.name) == weapon_id)
        {
            return Some(named);
        }
    }

    attacks
        .iter()
        .find(|a| !a.is_ranged())
        .or_else(|| attacks.first())
        .copied()
}

/// "Arco corto" → "arco_corto", for matching against compendium ids.
fn normalize_action_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn damage_expr(base: &str, modifier: i32) -> String {
    match modifier.cmp(&0) {
        std::cmp::Ordering::Greater => format!("{base}+{modifier}"),
        std::cmp::Ordering::Less => format!("{base}{modifier}"),
        std::cmp::Ordering::Equal => base.to_string(),
    }
}

fn find_combatant<'s>(scene: &'s SceneContext, id: &str) -> Option<&'s CombatantRef> {
    scene
        .living_enemies
        .iter()
        .chain(scene.allies.iter())
        .find(|c| c.instance_id == id)
}

/// A recovery hint matching the rejection, when one exists.
fn suggest(code: ErrorCode, reason: &str, scene: &SceneContext) -> Option<String> {
    match code {
        ErrorCode::WeaponNotEquipped => Some(
            "Usa una interacción de objeto para equipar el arma primero, o ataca desarmado"
                .to_string(),
        ),
        ErrorCode::TargetDead | ErrorCode::NoTarget => {
            if scene.living_enemies.is_empty() {
                Some("No hay enemigos vivos".to_string())
            } else {
                let names: Vec<&str> = scene.living_enemies.iter().map(|e| e.name.as_str()).collect();
                Some(format!("Elige otro objetivo: {}", names.join(", ")))
            }
        }
        ErrorCode::NoSlots => {
            Some("Usa un truco (nivel 0) o descansa para recuperar ranuras".to_string())
        }
        ErrorCode::NoMovement => {
            Some("Usa la acción Dash para duplicar tu movimiento este turno".to_string())
        }
        ErrorCode::CannotAct | ErrorCode::ConditionBlocks => {
            if reason.contains("muerto") {
                None
            } else {
                Some("No puedes actuar mientras dure esta condición".to_string())
            }
        }
        _ => None,
    }
}
