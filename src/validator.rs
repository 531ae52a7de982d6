//! Action legality checks.
//!
//! Says whether an action is possible and why not; never executes
//! anything and never mutates state. With `strict_equipment` off
//! (the default) an unequipped weapon only warns.

use crate::compendium::Compendium;
use crate::normalizer::{ActorProfile, CombatantRef};
use crate::rules::{Condition, Skill};
use crate::vocabulary::GenericActionId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Stable machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoTarget,
    TargetDead,
    WeaponNotFound,
    WeaponNotEquipped,
    SpellNotFound,
    NoSlots,
    LevelTooLow,
    CannotAct,
    NoMovement,
    ConditionBlocks,
    InvalidSkill,
    ItemNotFound,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoTarget => "NO_TARGET",
            ErrorCode::TargetDead => "TARGET_DEAD",
            ErrorCode::WeaponNotFound => "WEAPON_NOT_FOUND",
            ErrorCode::WeaponNotEquipped => "WEAPON_NOT_EQUIPPED",
            ErrorCode::SpellNotFound => "SPELL_NOT_FOUND",
            ErrorCode::NoSlots => "NO_SLOTS",
            ErrorCode::LevelTooLow => "LEVEL_TOO_LOW",
            ErrorCode::CannotAct => "CANNOT_ACT",
            ErrorCode::NoMovement => "NO_MOVEMENT",
            ErrorCode::ConditionBlocks => "CONDITION_BLOCKS",
            ErrorCode::InvalidSkill => "INVALID_SKILL",
            ErrorCode::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{name}")
    }
}

/// Verdict on a single action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub code: Option<ErrorCode>,
    pub reason: String,
    pub warnings: Vec<String>,
    pub extra: Map<String, Value>,
}

impl Validation {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            code: None,
            reason: reason.into(),
            warnings: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn fail(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            code: Some(code),
            reason: reason.into(),
            warnings: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Validates actions against actor and target state.
pub struct Validator<'a> {
    compendium: &'a Compendium,
    strict_equipment: bool,
}

impl<'a> Validator<'a> {
    pub fn new(compendium: &'a Compendium) -> Self {
        Self {
            compendium,
            strict_equipment: false,
        }
    }

    pub fn with_strict_equipment(compendium: &'a Compendium, strict: bool) -> Self {
        Self {
            compendium,
            strict_equipment: strict,
        }
    }

    pub fn strict_equipment(&self) -> bool {
        self.strict_equipment
    }

    /// Attack: actor can act, target exists and lives, weapon exists
    /// (and is equipped, under strict equipment).
    pub fn validate_attack(
        &self,
        actor: &ActorProfile,
        target: Option<&CombatantRef>,
        weapon_id: Option<&str>,
    ) -> Validation {
        if let Some(blocked) = check_can_act(actor) {
            return blocked;
        }

        let Some(target) = target else {
            return Validation::fail(ErrorCode::NoTarget, "No hay objetivo seleccionado");
        };
        if target.dead {
            return Validation::fail(
                ErrorCode::TargetDead,
                format!("{} ya está muerto", target.name),
            );
        }

        let mut validation = Validation::ok(format!("Ataque válido contra {}", target.name));

        if let Some(weapon_id) = weapon_id.filter(|id| *id != "unarmed") {
            let Some(weapon) = self.compendium.weapon(weapon_id) else {
                return Validation::fail(
                    ErrorCode::WeaponNotFound,
                    format!("El arma '{weapon_id}' no existe en el compendio"),
                );
            };

            let equipped = actor.equipped_main.as_deref() == Some(weapon_id)
                || actor.equipped_off.as_deref() == Some(weapon_id);
            if !equipped {
                if self.strict_equipment {
                    return Validation::fail(
                        ErrorCode::WeaponNotEquipped,
                        format!("'{}' no está equipada (modo estricto)", weapon.name),
                    )
                    .with_warning("Usa una interacción de objeto para equiparla primero");
                }
                validation
                    .warnings
                    .push(format!("'{}' no está equipada", weapon.name));
            }
        }

        validation
    }

    /// Spell: actor can act, spell exists, enough slots at a high
    /// enough level. Unknown-but-real spells warn, never reject.
    pub fn validate_spell(
        &self,
        actor: &ActorProfile,
        spell_id: &str,
        casting_level: Option<u8>,
        target: Option<&CombatantRef>,
    ) -> Validation {
        if let Some(blocked) = check_can_act(actor) {
            return blocked;
        }

        let Some(spell) = self.compendium.spell(spell_id) else {
            return Validation::fail(
                ErrorCode::SpellNotFound,
                format!("El conjuro '{spell_id}' no existe en el compendio"),
            );
        };

        let mut validation = Validation::ok(format!("Puede lanzar '{}'", spell.name));

        if !actor.known_spells.iter().any(|s| s == spell_id)
            && !actor.prepared_spells.iter().any(|s| s == spell_id)
        {
            validation.warnings.push(format!(
                "'{}' no está entre los conjuros conocidos o preparados",
                spell.name
            ));
        }

        if spell.level > 0 {
            let level = casting_level.unwrap_or(spell.level);
            if level < spell.level {
                return Validation::fail(
                    ErrorCode::LevelTooLow,
                    format!(
                        "'{}' es de nivel {}, no puede lanzarse con una ranura de nivel {}",
                        spell.name, spell.level, level
                    ),
                );
            }
            let remaining = actor.spell_slots.get(&level).copied().unwrap_or(0);
            if remaining == 0 {
                return Validation::fail(
                    ErrorCode::NoSlots,
                    format!("No quedan ranuras de nivel {level} disponibles"),
                );
            }
            validation = validation.with_extra("casting_level", json!(level));
        } else {
            validation = validation.with_extra("cantrip", json!(true));
        }

        if spell.requires_target() && target.is_none() {
            validation
                .warnings
                .push(format!("'{}' podría requerir un objetivo", spell.name));
        }

        validation
    }

    /// Item: actor can act and the item exists.
    pub fn validate_use_item(&self, actor: &ActorProfile, item_id: &str) -> Validation {
        if let Some(blocked) = check_can_act(actor) {
            return blocked;
        }
        match self.compendium.item(item_id) {
            Some(item) => Validation::ok(format!("Puede usar '{}'", item.name)),
            None => Validation::fail(
                ErrorCode::ItemNotFound,
                format!("El objeto '{item_id}' no existe en el compendio"),
            ),
        }
    }

    /// Movement: no pinning condition and enough movement left.
    pub fn validate_move(
        &self,
        actor: &ActorProfile,
        distance_feet: u32,
        movement_remaining: u32,
    ) -> Validation {
        if actor.unconscious || actor.conditions.contains(&Condition::Unconscious) {
            return Validation::fail(
                ErrorCode::ConditionBlocks,
                format!("{} no puede moverse: está inconsciente", actor.name),
            );
        }
        if let Some(condition) = actor.conditions.iter().find(|c| c.blocks_movement()) {
            return Validation::fail(
                ErrorCode::ConditionBlocks,
                format!(
                    "{} no puede moverse: está {}",
                    actor.name,
                    condition.spanish_name()
                ),
            );
        }

        if distance_feet > movement_remaining {
            return Validation::fail(
                ErrorCode::NoMovement,
                format!(
                    "Movimiento insuficiente: necesita {distance_feet} pies, le quedan {movement_remaining} pies"
                ),
            );
        }

        let left = movement_remaining - distance_feet;
        Validation::ok(format!(
            "Puede moverse {distance_feet} pies (quedarán {left} pies)"
        ))
        .with_extra("movement_remaining_after", json!(left))
    }

    /// Skill check: conditions may add warnings but never reject.
    pub fn validate_skill(&self, actor: &ActorProfile, skill: Skill) -> Validation {
        if let Some(blocked) = check_can_act(actor) {
            return blocked;
        }

        let mut validation = Validation::ok(format!("Puede hacer una prueba de {}", skill.key()));

        if actor.conditions.contains(&Condition::Blinded) && skill == Skill::Perception {
            validation.warnings.push(
                "Está cegado: desventaja en Percepción que dependa de la vista".to_string(),
            );
        }
        if actor.conditions.contains(&Condition::Frightened) {
            validation.warnings.push(
                "Está asustado: desventaja en pruebas mientras vea la fuente del miedo".to_string(),
            );
        }

        validation
    }

    /// Skill check from a raw key; the set is closed.
    pub fn validate_skill_key(&self, actor: &ActorProfile, skill_key: &str) -> Validation {
        let normalized = skill_key.to_lowercase().replace(' ', "_");
        match Skill::from_key(&normalized) {
            Some(skill) => self.validate_skill(actor, skill),
            None => Validation::fail(
                ErrorCode::InvalidSkill,
                format!("'{skill_key}' no es una habilidad válida"),
            )
            .with_extra(
                "valid_skills",
                json!(Skill::all().iter().map(|s| s.key()).collect::<Vec<_>>()),
            ),
        }
    }

    /// Generic actions only require the actor to be able to act.
    pub fn validate_generic(&self, actor: &ActorProfile, action: GenericActionId) -> Validation {
        if let Some(blocked) = check_can_act(actor) {
            return blocked;
        }

        let name = &actor.name;
        let reason = match action {
            GenericActionId::Dash => {
                format!("{name} puede usar Dash (duplica su movimiento este turno)")
            }
            GenericActionId::Disengage => {
                format!("{name} puede usar Disengage (no provoca ataques de oportunidad)")
            }
            GenericActionId::Dodge => {
                format!("{name} puede usar Dodge (los ataques contra él tienen desventaja)")
            }
            GenericActionId::Help => format!("{name} puede usar Help (da ventaja a un aliado)"),
            GenericActionId::Hide => format!("{name} puede intentar Hide (tirada de Sigilo)"),
            GenericActionId::Search => {
                format!("{name} puede usar Search (tirada de Percepción o Investigación)")
            }
            GenericActionId::Ready => format!("{name} puede preparar una acción"),
        };
        Validation::ok(reason)
    }
}

/// The shared can-act gate: not dead, not unconscious, HP above zero,
/// no action-blocking condition.
fn check_can_act(actor: &ActorProfile) -> Option<Validation> {
    if actor.dead {
        return Some(Validation::fail(
            ErrorCode::CannotAct,
            format!("{} está muerto", actor.name),
        ));
    }
    if actor.unconscious {
        return Some(Validation::fail(
            ErrorCode::CannotAct,
            format!("{} está inconsciente", actor.name),
        ));
    }
    if let Some(hp) = actor.hp_current {
        if hp <= 0 {
            return Some(Validation::fail(
                ErrorCode::CannotAct,
                format!("{} tiene 0 puntos de golpe", actor.name),
            ));
        }
    }
    if let Some(condition) = actor.conditions.iter().find(|c| c.blocks_actions()) {
        return Some(Validation::fail(
            ErrorCode::CannotAct,
            format!(
                "{} está {} y no puede actuar",
                actor.name,
                condition.spanish_name()
            ),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_actor, sample_enemy};

    fn compendium() -> Compendium {
        Compendium::builtin()
    }

    #[test]
    fn attack_happy_path() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();
        let target = sample_enemy("orc_1", "Orco");

        let validation = validator.validate_attack(&actor, Some(&target), Some("espada_larga"));
        assert!(validation.valid);
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn attack_requires_target() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();

        let validation = validator.validate_attack(&actor, None, Some("espada_larga"));
        assert!(!validation.valid);
        assert_eq!(validation.code, Some(ErrorCode::NoTarget));
    }

    #[test]
    fn attack_rejects_dead_target() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();
        let mut target = sample_enemy("orc_1", "Orco");
        target.dead = true;

        let validation = validator.validate_attack(&actor, Some(&target), None);
        assert_eq!(validation.code, Some(ErrorCode::TargetDead));
    }

    #[test]
    fn attack_unknown_weapon() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();
        let target = sample_enemy("orc_1", "Orco");

        let validation = validator.validate_attack(&actor, Some(&target), Some("katana"));
        assert_eq!(validation.code, Some(ErrorCode::WeaponNotFound));
    }

    #[test]
    fn unequipped_weapon_warns_or_rejects() {
        let compendium = compendium();
        let actor = sample_actor(); // espada_larga equipped
        let target = sample_enemy("orc_1", "Orco");

        let lax = Validator::new(&compendium);
        let validation = lax.validate_attack(&actor, Some(&target), Some("daga"));
        assert!(validation.valid);
        assert!(validation.warnings.iter().any(|w| w.contains("no está equipada")));

        let strict = Validator::with_strict_equipment(&compendium, true);
        let validation = strict.validate_attack(&actor, Some(&target), Some("daga"));
        assert!(!validation.valid);
        assert_eq!(validation.code, Some(ErrorCode::WeaponNotEquipped));
    }

    #[test]
    fn unarmed_needs_no_weapon_lookup() {
        let compendium = compendium();
        let validator = Validator::with_strict_equipment(&compendium, true);
        let actor = sample_actor();
        let target = sample_enemy("orc_1", "Orco");

        let validation = validator.validate_attack(&actor, Some(&target), Some("unarmed"));
        assert!(validation.valid);
    }

    #[test]
    fn cannot_act_gates_everything() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let target = sample_enemy("orc_1", "Orco");

        let mut actor = sample_actor();
        actor.conditions.insert(Condition::Paralyzed);

        for validation in [
            validator.validate_attack(&actor, Some(&target), None),
            validator.validate_spell(&actor, "proyectil_magico", None, None),
            validator.validate_use_item(&actor, "pocion_curacion"),
            validator.validate_skill(&actor, Skill::Perception),
            validator.validate_generic(&actor, GenericActionId::Dodge),
        ] {
            assert!(!validation.valid);
            assert_eq!(validation.code, Some(ErrorCode::CannotAct));
        }
    }

    #[test]
    fn spell_without_slots_rejected() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let mut actor = sample_actor();
        actor.known_spells = vec!["proyectil_magico".to_string()];
        actor.spell_slots.insert(1, 0);

        let validation = validator.validate_spell(&actor, "proyectil_magico", None, None);
        assert!(!validation.valid);
        assert_eq!(validation.code, Some(ErrorCode::NoSlots));
        assert!(validation.reason.contains("nivel 1"));
    }

    #[test]
    fn spell_slot_level_must_cover_spell_level() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let mut actor = sample_actor();
        actor.spell_slots.insert(1, 2);
        actor.spell_slots.insert(3, 1);

        let validation = validator.validate_spell(&actor, "bola_de_fuego", Some(1), None);
        assert_eq!(validation.code, Some(ErrorCode::LevelTooLow));

        let validation = validator.validate_spell(&actor, "bola_de_fuego", Some(3), None);
        assert!(validation.valid);
    }

    #[test]
    fn cantrips_need_no_slot() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let mut actor = sample_actor();
        actor.known_spells = vec!["rayo_de_escarcha".to_string()];

        let validation = validator.validate_spell(&actor, "rayo_de_escarcha", None, None);
        assert!(validation.valid);
        assert_eq!(validation.extra.get("cantrip"), Some(&json!(true)));
    }

    #[test]
    fn unknown_spell_warns_but_passes() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let mut actor = sample_actor();
        actor.known_spells.clear();
        actor.spell_slots.insert(1, 1);

        let validation = validator.validate_spell(&actor, "proyectil_magico", None, None);
        assert!(validation.valid);
        assert!(validation
            .warnings
            .iter()
            .any(|w| w.contains("conocidos o preparados")));
    }

    #[test]
    fn missing_spell_rejected() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();

        let validation = validator.validate_spell(&actor, "deseo", None, None);
        assert_eq!(validation.code, Some(ErrorCode::SpellNotFound));
    }

    #[test]
    fn movement_budget_enforced() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();

        let validation = validator.validate_move(&actor, 20, 30);
        assert!(validation.valid);
        assert_eq!(
            validation.extra.get("movement_remaining_after"),
            Some(&json!(10))
        );

        let validation = validator.validate_move(&actor, 40, 30);
        assert_eq!(validation.code, Some(ErrorCode::NoMovement));
    }

    #[test]
    fn pinned_actor_cannot_move() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let mut actor = sample_actor();
        actor.conditions.insert(Condition::Grappled);

        let validation = validator.validate_move(&actor, 5, 30);
        assert_eq!(validation.code, Some(ErrorCode::ConditionBlocks));
        assert!(validation.reason.contains("agarrado"));
    }

    #[test]
    fn skill_condition_warnings() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let mut actor = sample_actor();
        actor.conditions.insert(Condition::Blinded);

        let validation = validator.validate_skill(&actor, Skill::Perception);
        assert!(validation.valid);
        assert!(validation.warnings.iter().any(|w| w.contains("cegado")));

        let validation = validator.validate_skill(&actor, Skill::Athletics);
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn skill_key_outside_closed_set() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();

        let validation = validator.validate_skill_key(&actor, "volar");
        assert_eq!(validation.code, Some(ErrorCode::InvalidSkill));

        let validation = validator.validate_skill_key(&actor, "Trato Animales");
        assert!(validation.valid);
    }

    #[test]
    fn generic_actions_have_descriptive_reasons() {
        let compendium = compendium();
        let validator = Validator::new(&compendium);
        let actor = sample_actor();

        let validation = validator.validate_generic(&actor, GenericActionId::Dash);
        assert!(validation.valid);
        assert!(validation.reason.contains("duplica"));
    }
}
