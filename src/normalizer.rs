//! Free text → canonical action.
//!
//! Hybrid approach, deterministic first:
//! 1. vocabulary patterns (fast, maintainable)
//! 2. an optional LLM fallback, only for what the patterns left open
//!
//! The LLM never decides rules; it only fills JSON fields. Legality is
//! the validator's call.

use crate::compendium::Compendium;
use crate::dice::RollMode;
use crate::rules::{AbilityScores, Condition, Skill};
use crate::vocabulary::{self, GenericActionId, Intent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Errors from normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Empty input text")]
    InvalidInput,
}

/// Failure reported by the LLM fallback. Degrades to a warning.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FallbackFailure(pub String);

/// Where the final field values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    #[default]
    Pattern,
    Llm,
}

/// Melee, ranged or bare fists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttackSubtype {
    #[default]
    Melee,
    Ranged,
    Unarmed,
}

/// Kind-specific payload of a canonical action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ActionData {
    Attack {
        attacker_id: String,
        target_id: Option<String>,
        /// Compendium id, or "unarmed".
        weapon_id: Option<String>,
        subtype: AttackSubtype,
        mode: RollMode,
    },
    Spell {
        caster_id: String,
        target_id: Option<String>,
        spell_id: Option<String>,
        casting_level: Option<u8>,
    },
    Move {
        actor_id: String,
        distance_feet: Option<u32>,
        destination: Option<String>,
    },
    Skill {
        actor_id: String,
        skill: Option<Skill>,
        target_id: Option<String>,
    },
    GenericAction {
        actor_id: String,
        action_id: Option<GenericActionId>,
    },
    UseItem {
        actor_id: String,
        item_id: Option<String>,
    },
    Unknown {
        actor_id: String,
    },
}

impl ActionData {
    pub fn actor_id(&self) -> &str {
        match self {
            ActionData::Attack { attacker_id, .. } => attacker_id,
            ActionData::Spell { caster_id, .. } => caster_id,
            ActionData::Move { actor_id, .. }
            | ActionData::Skill { actor_id, .. }
            | ActionData::GenericAction { actor_id, .. }
            | ActionData::UseItem { actor_id, .. }
            | ActionData::Unknown { actor_id } => actor_id,
        }
    }

    /// Fields that must be present before the action can execute.
    fn critical_fields(&self) -> &'static [&'static str] {
        match self {
            ActionData::Attack { .. } => &["target_id"],
            ActionData::Spell { .. } => &["spell_id"],
            ActionData::Move { .. } => &[],
            ActionData::Skill { .. } => &["skill"],
            ActionData::GenericAction { .. } => &["action_id"],
            ActionData::UseItem { .. } => &["item_id"],
            ActionData::Unknown { .. } => &["kind"],
        }
    }
}

/// A normalized action plus everything the pipeline needs to decide
/// whether it can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAction {
    #[serde(flatten)]
    pub data: ActionData,
    /// 0.0-1.0; LLM-sourced fields cap at 0.9.
    pub confidence: f32,
    pub missing_fields: Vec<String>,
    pub warnings: Vec<String>,
    pub original_text: String,
    pub needs_clarification: bool,
    pub source: ActionSource,
}

impl CanonicalAction {
    /// Complete enough to skip the LLM fallback.
    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty() && self.confidence >= 0.7
    }
}

// ============================================================================
// Scene context
// ============================================================================

/// A weapon the actor can reach for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponRef {
    /// Compendium id.
    pub id: String,
    pub name: String,
}

/// A spell the actor knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellRef {
    pub id: String,
    pub name: String,
}

/// Another combatant as seen from the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantRef {
    pub instance_id: String,
    pub name: String,
    pub compendium_ref: Option<String>,
    pub hp_current: i32,
    pub armor_class: i32,
    pub dead: bool,
    /// Snapshot for saving throws; `None` falls back to +0.
    pub abilities: Option<AbilityScores>,
}

/// The acting combatant's own sheet, as the validator and executor
/// need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: String,
    pub name: String,
    pub abilities: AbilityScores,
    pub proficiency_bonus: i32,
    pub speed: u32,
    pub conditions: BTreeSet<Condition>,
    pub unconscious: bool,
    pub dead: bool,
    pub hp_current: Option<i32>,
    /// Equipped weapon compendium ids.
    pub equipped_main: Option<String>,
    pub equipped_off: Option<String>,
    /// Spell ids.
    pub known_spells: Vec<String>,
    pub prepared_spells: Vec<String>,
    /// Remaining slots per level.
    pub spell_slots: BTreeMap<u8, u8>,
    pub spell_save_dc: Option<i32>,
    pub spell_attack_bonus: Option<i32>,
    /// Final check bonus per skill key; ability modifier when absent.
    pub skill_bonuses: BTreeMap<String, i32>,
    /// Stat-block attacks, for monsters and summoned allies.
    pub monster_actions: Vec<crate::compendium::MonsterAction>,
}

impl ActorProfile {
    /// Not dead, not unconscious, not at 0 HP, no action-blocking
    /// condition.
    pub fn can_act(&self) -> bool {
        !self.dead
            && !self.unconscious
            && self.hp_current.map_or(true, |hp| hp > 0)
            && !self.conditions.iter().any(|c| c.blocks_actions())
    }
}

/// Everything the normalizer may use to resolve ambiguity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneContext {
    pub actor: ActorProfile,
    pub primary_weapon: Option<WeaponRef>,
    pub secondary_weapon: Option<WeaponRef>,
    pub available_weapons: Vec<WeaponRef>,
    pub known_spells: Vec<SpellRef>,
    /// Remaining slots per level.
    pub available_slots: BTreeMap<u8, u8>,
    pub living_enemies: Vec<CombatantRef>,
    pub allies: Vec<CombatantRef>,
    pub movement_remaining: u32,
    pub action_available: bool,
    pub bonus_available: bool,
}

// ============================================================================
// LLM fallback
// ============================================================================

/// What the fallback sees. Serialized into its prompt context.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackRequest {
    pub player_text: String,
    pub detected_kind: String,
    pub partial: Value,
    pub missing_fields: Vec<String>,
    pub equipped_weapons: Vec<WeaponRef>,
    pub living_enemies: Vec<CombatantRef>,
}

/// Optional capability: an LLM that fills missing canonical fields.
///
/// Implementations must return only fields they were asked about, as a
/// flat JSON object. They never decide legality.
pub trait NormalizerFallback {
    fn complete(
        &self,
        prompt: &str,
        request: &FallbackRequest,
    ) -> Result<serde_json::Map<String, Value>, FallbackFailure>;
}

// ============================================================================
// Normalizer
// ============================================================================

/// Normalizes player text into [`CanonicalAction`]s.
pub struct Normalizer<'a> {
    compendium: &'a Compendium,
    fallback: Option<&'a dyn NormalizerFallback>,
}

impl<'a> Normalizer<'a> {
    pub fn new(compendium: &'a Compendium) -> Self {
        Self {
            compendium,
            fallback: None,
        }
    }

    pub fn with_fallback(compendium: &'a Compendium, fallback: &'a dyn NormalizerFallback) -> Self {
        Self {
            compendium,
            fallback: Some(fallback),
        }
    }

    /// Normalize one utterance.
    pub fn normalize(
        &self,
        text: &str,
        scene: &SceneContext,
    ) -> Result<CanonicalAction, NormalizeError> {
        if text.trim().is_empty() {
            return Err(NormalizeError::InvalidInput);
        }
        let clean = preprocess(text);

        let mut action = match self.detect_intent(&clean, scene) {
            Some(Intent::Attack) => self.normalize_attack(&clean, scene),
            Some(Intent::Spell) => self.normalize_spell(&clean, scene),
            Some(Intent::Move) => self.normalize_move(&clean, scene),
            Some(Intent::Skill) => self.normalize_skill(&clean, scene),
            Some(Intent::Generic) => self.normalize_generic(&clean, scene),
            Some(Intent::Item) => self.normalize_item(&clean, scene),
            None => self.unknown(scene),
        };
        action.original_text = text.to_string();

        self.resolve_ambiguities(&mut action, scene);

        if !action.is_complete() {
            if let Some(fallback) = self.fallback {
                self.run_fallback(&mut action, text, scene, fallback);
            }
        }

        canonicalize(&mut action);
        debug!(
            kind = ?std::mem::discriminant(&action.data),
            confidence = action.confidence,
            needs_clarification = action.needs_clarification,
            "normalized action"
        );
        Ok(action)
    }

    /// Intent detection, in strict priority order.
    fn detect_intent(&self, text: &str, scene: &SceneContext) -> Option<Intent> {
        // 1. Generic action phrases are the most specific.
        if vocabulary::generic_action_for(text).is_some() {
            return Some(Intent::Generic);
        }

        // 2. A known spell named literally, scene list first.
        let names_spell = scene
            .known_spells
            .iter()
            .any(|s| !s.name.is_empty() && text.contains(&s.name.to_lowercase()))
            || self
                .compendium
                .spells()
                .iter()
                .any(|s| text.contains(&s.name.to_lowercase()));
        if names_spell {
            return Some(Intent::Spell);
        }

        // 3. A skill named literally, from the closed set.
        let skill_text = fold_skill_accents(text);
        if Skill::all().iter().any(|s| skill_text.contains(s.key())) {
            return Some(Intent::Skill);
        }

        // 4. Verb lookup in the shared vocabulary.
        if let Some(intent) = vocabulary::intent_for(text) {
            return Some(intent);
        }

        // 5. Potion / item phrasing.
        if text.contains("poción") || text.contains("pocion") {
            return Some(Intent::Item);
        }

        None
    }

    fn normalize_attack(&self, text: &str, scene: &SceneContext) -> CanonicalAction {
        let mut missing = Vec::new();
        let mut confidence: f32 = 0.7;

        let (weapon_id, subtype) = if vocabulary::is_unarmed(text) {
            (Some("unarmed".to_string()), AttackSubtype::Unarmed)
        } else {
            match self.find_weapon(text, scene) {
                Some(id) => {
                    confidence = (confidence + 0.1).min(1.0);
                    (Some(id), AttackSubtype::Melee)
                }
                None => {
                    missing.push("weapon_id".to_string());
                    (None, AttackSubtype::Melee)
                }
            }
        };

        let target_id = match find_target(text, scene) {
            Some(id) => {
                confidence = (confidence + 0.1).min(1.0);
                Some(id)
            }
            None => {
                missing.push("target_id".to_string());
                None
            }
        };

        let mode = if contains_word(text, "desventaja") {
            RollMode::Disadvantage
        } else if contains_word(text, "ventaja") {
            RollMode::Advantage
        } else {
            RollMode::Normal
        };

        let subtype = if subtype != AttackSubtype::Unarmed
            && ["arco", "ballesta", "distancia", "disparar", "disparo"]
                .iter()
                .any(|w| contains_word(text, w))
        {
            AttackSubtype::Ranged
        } else {
            subtype
        };

        CanonicalAction {
            data: ActionData::Attack {
                attacker_id: scene.actor.id.clone(),
                target_id,
                weapon_id,
                subtype,
                mode,
            },
            confidence,
            missing_fields: missing,
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: false,
            source: ActionSource::Pattern,
        }
    }

    fn normalize_spell(&self, text: &str, scene: &SceneContext) -> CanonicalAction {
        let mut missing = Vec::new();
        let mut confidence: f32 = 0.6;
        let mut casting_level = None;

        let spell_id = match self.find_spell(text, scene) {
            Some(id) => {
                confidence = (confidence + 0.2).min(1.0);
                if let Some(entry) = self.compendium.spell(&id) {
                    casting_level = Some(entry.level);
                }
                Some(id)
            }
            None => {
                missing.push("spell_id".to_string());
                None
            }
        };

        // "nivel N" overrides the casting level.
        if let Some(level) = number_after_word(text, "nivel") {
            casting_level = Some(level.min(9) as u8);
        }

        let target_id = find_target(text, scene);

        CanonicalAction {
            data: ActionData::Spell {
                caster_id: scene.actor.id.clone(),
                target_id,
                spell_id,
                casting_level,
            },
            confidence,
            missing_fields: missing,
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: false,
            source: ActionSource::Pattern,
        }
    }

    fn normalize_move(&self, text: &str, scene: &SceneContext) -> CanonicalAction {
        let mut missing = Vec::new();
        let confidence: f32 = 0.7;

        let distance_feet = extract_distance_feet(text);
        if distance_feet.is_none() {
            missing.push("distance_feet".to_string());
        }

        let destination = extract_destination(text);

        CanonicalAction {
            data: ActionData::Move {
                actor_id: scene.actor.id.clone(),
                distance_feet,
                destination,
            },
            confidence,
            missing_fields: missing,
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: false,
            source: ActionSource::Pattern,
        }
    }

    fn normalize_skill(&self, text: &str, scene: &SceneContext) -> CanonicalAction {
        let mut missing = Vec::new();
        let confidence: f32;

        let skill_text = fold_skill_accents(text);
        let by_name = Skill::all()
            .into_iter()
            .find(|s| skill_text.contains(s.key()));

        let skill = match by_name {
            Some(skill) => {
                confidence = 0.9;
                Some(skill)
            }
            None => match vocabulary::skill_for(text) {
                Some(skill) => {
                    confidence = 0.85;
                    Some(skill)
                }
                None => {
                    confidence = 0.4;
                    missing.push("skill".to_string());
                    None
                }
            },
        };

        CanonicalAction {
            data: ActionData::Skill {
                actor_id: scene.actor.id.clone(),
                skill,
                target_id: find_target(text, scene),
            },
            confidence,
            missing_fields: missing,
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: false,
            source: ActionSource::Pattern,
        }
    }

    fn normalize_generic(&self, text: &str, scene: &SceneContext) -> CanonicalAction {
        let mut missing = Vec::new();
        let confidence;

        let action_id = match vocabulary::generic_action_for(text) {
            Some(action) => {
                confidence = 0.9;
                Some(action)
            }
            None => {
                confidence = 0.5;
                missing.push("action_id".to_string());
                None
            }
        };

        CanonicalAction {
            data: ActionData::GenericAction {
                actor_id: scene.actor.id.clone(),
                action_id,
            },
            confidence,
            missing_fields: missing,
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: false,
            source: ActionSource::Pattern,
        }
    }

    fn normalize_item(&self, text: &str, scene: &SceneContext) -> CanonicalAction {
        let mut missing = vec!["item_id".to_string()];
        let mut confidence: f32 = 0.5;

        let mut item_id = None;
        for entry in self.compendium.items() {
            if text.contains(&entry.name.to_lowercase()) || contains_word(text, &entry.id) {
                item_id = Some(entry.id.clone());
                missing.clear();
                confidence = 0.85;
                break;
            }
        }

        // A bare "poción" defaults to the healing potion if stocked.
        if item_id.is_none()
            && (text.contains("poción") || text.contains("pocion"))
            && self.compendium.item("pocion_curacion").is_some()
        {
            item_id = Some("pocion_curacion".to_string());
            missing.clear();
            confidence = 0.6;
        }

        CanonicalAction {
            data: ActionData::UseItem {
                actor_id: scene.actor.id.clone(),
                item_id,
            },
            confidence,
            missing_fields: missing,
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: false,
            source: ActionSource::Pattern,
        }
    }

    /// What can be settled from scene context alone.
    fn resolve_ambiguities(&self, action: &mut CanonicalAction, scene: &SceneContext) {
        if action.missing_fields.iter().any(|f| f == "target_id") {
            match scene.living_enemies.len() {
                1 => {
                    let enemy = &scene.living_enemies[0];
                    set_target(&mut action.data, enemy.instance_id.clone());
                    action.missing_fields.retain(|f| f != "target_id");
                    action
                        .warnings
                        .push(format!("Objetivo inferido: {}", enemy.name));
                    action.confidence = (action.confidence + 0.1).min(1.0);
                }
                n if n > 1 => {
                    let names: Vec<&str> =
                        scene.living_enemies.iter().map(|e| e.name.as_str()).collect();
                    action
                        .warnings
                        .push(format!("Múltiples objetivos: {}", names.join(", ")));
                }
                _ => {}
            }
        }

        if action.missing_fields.iter().any(|f| f == "weapon_id") {
            if let ActionData::Attack { weapon_id, .. } = &mut action.data {
                let inferred = scene
                    .primary_weapon
                    .as_ref()
                    .or(scene.secondary_weapon.as_ref());
                if let Some(weapon) = inferred {
                    *weapon_id = Some(weapon.id.clone());
                    action.missing_fields.retain(|f| f != "weapon_id");
                    action
                        .warnings
                        .push(format!("Arma inferida: {}", weapon.name));
                    action.confidence = (action.confidence + 0.1).min(1.0);
                }
            }
        }

        // Spells default to their base level.
        if let ActionData::Spell {
            spell_id: Some(spell_id),
            casting_level,
            ..
        } = &mut action.data
        {
            if casting_level.is_none() {
                if let Some(entry) = self.compendium.spell(spell_id) {
                    *casting_level = Some(entry.level);
                }
            }
        }
    }

    fn run_fallback(
        &self,
        action: &mut CanonicalAction,
        original_text: &str,
        scene: &SceneContext,
        fallback: &dyn NormalizerFallback,
    ) {
        let kind = kind_name(&action.data);
        let request = FallbackRequest {
            player_text: original_text.to_string(),
            detected_kind: kind.to_string(),
            partial: serde_json::to_value(&action.data).unwrap_or(Value::Null),
            missing_fields: action.missing_fields.clone(),
            equipped_weapons: scene
                .primary_weapon
                .iter()
                .chain(scene.secondary_weapon.iter())
                .cloned()
                .collect(),
            living_enemies: scene.living_enemies.clone(),
        };
        let prompt = format!(
            "Completa los campos faltantes de esta acción de D&D.\n\
             Texto del jugador: \"{original_text}\"\n\
             Tipo detectado: {kind}\n\
             Campos faltantes: {}\n\
             Responde SOLO con un objeto JSON con esos campos.",
            action.missing_fields.join(", ")
        );

        match fallback.complete(&prompt, &request) {
            Ok(fields) => {
                let mut merged_any = false;
                for (key, value) in fields {
                    if value.is_null() {
                        continue;
                    }
                    if merge_field(&mut action.data, &key, &value, &mut action.warnings) {
                        action.missing_fields.retain(|f| f != &key);
                        merged_any = true;
                    }
                }
                if merged_any {
                    action.source = ActionSource::Llm;
                    action.confidence = (action.confidence + 0.15).min(0.9);
                }
            }
            Err(err) => {
                action.warnings.push(format!("LLM_FAILURE: {err}"));
            }
        }
    }

    fn find_weapon(&self, text: &str, scene: &SceneContext) -> Option<String> {
        // The actor's own weapons first.
        for weapon in &scene.available_weapons {
            if !weapon.name.is_empty() && text.contains(&weapon.name.to_lowercase()) {
                return Some(weapon.id.clone());
            }
        }
        // Then anything in the compendium by literal name.
        for entry in self.compendium.weapons() {
            if text.contains(&entry.name.to_lowercase()) {
                return Some(entry.id.clone());
            }
        }
        // Then colloquial synonyms.
        vocabulary::weapon_synonym(text).map(|id| id.to_string())
    }

    fn find_spell(&self, text: &str, scene: &SceneContext) -> Option<String> {
        for spell in &scene.known_spells {
            if !spell.name.is_empty() && text.contains(&spell.name.to_lowercase()) {
                return Some(spell.id.clone());
            }
        }
        for entry in self.compendium.spells() {
            let name = entry.name.to_lowercase();
            if text.contains(&name) || text.contains(&name.replace(' ', "_")) {
                return Some(entry.id.clone());
            }
        }
        None
    }
}

// ============================================================================
// Text helpers
// ============================================================================

/// Lowercase, strip punctuation (keeping hyphens and Spanish
/// diacritics), collapse whitespace.
pub fn preprocess(text: &str) -> String {
    let lowered = text.to_lowercase();
    let kept: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Skill names are matched without accents ("percepción" → "percepcion").
fn fold_skill_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !is_word_char(c)).any(|w| w == word)
}

/// First number directly following `word` ("nivel 2" → 2).
fn number_after_word(text: &str, word: &str) -> Option<u32> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens
        .windows(2)
        .find(|w| w[0] == word)
        .and_then(|w| w[1].parse().ok())
}

/// Distance in feet, converting metres (×3.28) and squares (×5).
fn extract_distance_feet(text: &str) -> Option<u32> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for window in tokens.windows(2) {
        let Ok(value) = window[0].parse::<u32>() else {
            continue;
        };
        match window[1] {
            "pies" | "pie" | "ft" | "feet" => return Some(value),
            "metros" | "metro" | "m" => return Some((value as f32 * 3.28) as u32),
            "casillas" | "casilla" => return Some(value * 5),
            _ => {}
        }
    }
    None
}

/// Destination after "hacia"/"a", skipping articles.
fn extract_destination(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if *token != "hacia" && *token != "a" {
            continue;
        }
        let mut j = i + 1;
        while j < tokens.len() && matches!(tokens[j], "el" | "la" | "los" | "las") {
            j += 1;
        }
        if j < tokens.len() && tokens[j].parse::<u32>().is_err() {
            return Some(tokens[j].to_string());
        }
    }
    None
}

/// Target search: full name, then long name words, then compendium ref.
fn find_target(text: &str, scene: &SceneContext) -> Option<String> {
    for enemy in &scene.living_enemies {
        if !enemy.name.is_empty() && text.contains(&enemy.name.to_lowercase()) {
            return Some(enemy.instance_id.clone());
        }
    }
    for enemy in &scene.living_enemies {
        for word in enemy.name.to_lowercase().split_whitespace() {
            if word.chars().count() > 3 && contains_word(text, word) {
                return Some(enemy.instance_id.clone());
            }
        }
    }
    for enemy in &scene.living_enemies {
        if let Some(reference) = &enemy.compendium_ref {
            if contains_word(text, reference) {
                return Some(enemy.instance_id.clone());
            }
        }
    }
    None
}

fn set_target(data: &mut ActionData, id: String) {
    match data {
        ActionData::Attack { target_id, .. }
        | ActionData::Spell { target_id, .. }
        | ActionData::Skill { target_id, .. } => *target_id = Some(id),
        _ => {}
    }
}

fn kind_name(data: &ActionData) -> &'static str {
    match data {
        ActionData::Attack { .. } => "attack",
        ActionData::Spell { .. } => "spell",
        ActionData::Move { .. } => "move",
        ActionData::Skill { .. } => "skill",
        ActionData::GenericAction { .. } => "generic_action",
        ActionData::UseItem { .. } => "use_item",
        ActionData::Unknown { .. } => "unknown",
    }
}

/// Merge one LLM-provided field into the payload. Only fills `None`
/// slots; never overwrites pattern-derived values.
fn merge_field(data: &mut ActionData, key: &str, value: &Value, warnings: &mut Vec<String>) -> bool {
    let as_string = || value.as_str().map(|s| s.to_string());
    match (data, key) {
        (ActionData::Attack { target_id, .. }, "target_id") if target_id.is_none() => {
            *target_id = as_string();
            target_id.is_some()
        }
        (ActionData::Attack { weapon_id, .. }, "weapon_id") if weapon_id.is_none() => {
            *weapon_id = as_string();
            weapon_id.is_some()
        }
        (ActionData::Spell { target_id, .. }, "target_id") if target_id.is_none() => {
            *target_id = as_string();
            target_id.is_some()
        }
        (ActionData::Spell { spell_id, .. }, "spell_id") if spell_id.is_none() => {
            *spell_id = as_string();
            spell_id.is_some()
        }
        (ActionData::Spell { casting_level, .. }, "casting_level") if casting_level.is_none() => {
            *casting_level = value.as_u64().map(|v| v.min(9) as u8);
            casting_level.is_some()
        }
        (ActionData::Move { distance_feet, .. }, "distance_feet") if distance_feet.is_none() => {
            *distance_feet = value.as_u64().map(|v| v as u32);
            distance_feet.is_some()
        }
        (ActionData::Move { destination, .. }, "destination") if destination.is_none() => {
            *destination = as_string();
            destination.is_some()
        }
        (ActionData::Skill { skill, .. }, "skill") if skill.is_none() => {
            match value.as_str().and_then(Skill::from_key) {
                Some(parsed) => {
                    *skill = Some(parsed);
                    true
                }
                None => {
                    warnings.push(format!(
                        "El LLM propuso una habilidad desconocida: {value}"
                    ));
                    false
                }
            }
        }
        (ActionData::GenericAction { action_id, .. }, "action_id") if action_id.is_none() => {
            match value.as_str().and_then(GenericActionId::from_key) {
                Some(parsed) => {
                    *action_id = Some(parsed);
                    true
                }
                None => {
                    warnings.push(format!("El LLM propuso una acción desconocida: {value}"));
                    false
                }
            }
        }
        (ActionData::UseItem { item_id, .. }, "item_id") if item_id.is_none() => {
            *item_id = as_string();
            item_id.is_some()
        }
        _ => false,
    }
}

/// Final defaults + the clarification decision.
fn canonicalize(action: &mut CanonicalAction) {
    if let ActionData::Move { distance_feet, .. } = &mut action.data {
        // A move with no usable distance resolves to standing still.
        if distance_feet.is_none() && !action.missing_fields.iter().any(|f| f == "distance_feet") {
            *distance_feet = Some(0);
        }
    }
    if let ActionData::Spell {
        casting_level: casting_level @ None,
        ..
    } = &mut action.data
    {
        *casting_level = Some(1);
    }

    let critical = action.data.critical_fields();
    action.needs_clarification = action
        .missing_fields
        .iter()
        .any(|f| critical.contains(&f.as_str()))
        || matches!(action.data, ActionData::Unknown { .. });
}

impl Normalizer<'_> {
    fn unknown(&self, scene: &SceneContext) -> CanonicalAction {
        CanonicalAction {
            data: ActionData::Unknown {
                actor_id: scene.actor.id.clone(),
            },
            confidence: 0.0,
            missing_fields: vec!["kind".to_string()],
            warnings: Vec::new(),
            original_text: String::new(),
            needs_clarification: true,
            source: ActionSource::Pattern,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_scene, scene_with_enemies};

    fn compendium() -> Compendium {
        Compendium::builtin()
    }

    #[test]
    fn preprocess_keeps_diacritics_and_hyphens() {
        assert_eq!(preprocess("¡Ataco al Orco!"), "ataco al orco");
        assert_eq!(preprocess("lanzo  proyectil   mágico"), "lanzo proyectil mágico");
        assert_eq!(preprocess("saco el yelmo-de-hierro"), "saco el yelmo-de-hierro");
    }

    #[test]
    fn empty_input_is_an_error() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();
        assert_eq!(
            normalizer.normalize("   ", &scene),
            Err(NormalizeError::InvalidInput)
        );
    }

    #[test]
    fn attack_with_named_weapon_and_target() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Ataco al orco con mi espada larga", &scene)
            .unwrap();

        match &action.data {
            ActionData::Attack {
                target_id,
                weapon_id,
                subtype,
                mode,
                ..
            } => {
                assert_eq!(target_id.as_deref(), Some("orc_1"));
                assert_eq!(weapon_id.as_deref(), Some("espada_larga"));
                assert_eq!(*subtype, AttackSubtype::Melee);
                assert_eq!(*mode, RollMode::Normal);
            }
            other => panic!("expected attack, got {other:?}"),
        }
        assert!(!action.needs_clarification);
        assert!(action.confidence >= 0.9);
    }

    #[test]
    fn attack_infers_single_enemy_and_primary_weapon() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer.normalize("Ataco", &scene).unwrap();
        match &action.data {
            ActionData::Attack {
                target_id,
                weapon_id,
                ..
            } => {
                assert_eq!(target_id.as_deref(), Some("orc_1"));
                assert_eq!(weapon_id.as_deref(), Some("espada_larga"));
            }
            other => panic!("expected attack, got {other:?}"),
        }
        assert!(action.warnings.iter().any(|w| w.contains("Objetivo inferido")));
        assert!(action.warnings.iter().any(|w| w.contains("Arma inferida")));
        assert!(!action.needs_clarification);
    }

    #[test]
    fn ambiguous_target_requests_clarification() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = scene_with_enemies(&[("goblin_1", "Goblin"), ("goblin_archer", "Goblin arquero")]);

        let action = normalizer.normalize("Ataco", &scene).unwrap();
        assert!(action.needs_clarification);
        assert!(action.missing_fields.iter().any(|f| f == "target_id"));
        assert!(action
            .warnings
            .iter()
            .any(|w| w.contains("Múltiples objetivos")));
    }

    #[test]
    fn target_matched_by_word_of_name() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = scene_with_enemies(&[("goblin_1", "Goblin"), ("goblin_archer", "Goblin arquero")]);

        let action = normalizer.normalize("Ataco al arquero", &scene).unwrap();
        match &action.data {
            ActionData::Attack { target_id, .. } => {
                assert_eq!(target_id.as_deref(), Some("goblin_archer"));
            }
            other => panic!("expected attack, got {other:?}"),
        }
    }

    #[test]
    fn unarmed_strike_detected() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer.normalize("Le doy un puñetazo al orco", &scene).unwrap();
        match &action.data {
            ActionData::Attack {
                weapon_id, subtype, ..
            } => {
                assert_eq!(weapon_id.as_deref(), Some("unarmed"));
                assert_eq!(*subtype, AttackSubtype::Unarmed);
            }
            other => panic!("expected attack, got {other:?}"),
        }
    }

    #[test]
    fn advantage_mode_parsed() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Ataco al orco con ventaja", &scene)
            .unwrap();
        match &action.data {
            ActionData::Attack { mode, .. } => assert_eq!(*mode, RollMode::Advantage),
            other => panic!("expected attack, got {other:?}"),
        }

        let action = normalizer
            .normalize("Ataco al orco con desventaja", &scene)
            .unwrap();
        match &action.data {
            ActionData::Attack { mode, .. } => assert_eq!(*mode, RollMode::Disadvantage),
            other => panic!("expected attack, got {other:?}"),
        }
    }

    #[test]
    fn spell_by_name_with_base_level() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer.normalize("Lanzo proyectil mágico", &scene).unwrap();
        match &action.data {
            ActionData::Spell {
                spell_id,
                casting_level,
                ..
            } => {
                assert_eq!(spell_id.as_deref(), Some("proyectil_magico"));
                assert_eq!(*casting_level, Some(1));
            }
            other => panic!("expected spell, got {other:?}"),
        }
        assert!(!action.needs_clarification);
    }

    #[test]
    fn spell_level_override() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Lanzo proyectil mágico a nivel 2", &scene)
            .unwrap();
        match &action.data {
            ActionData::Spell { casting_level, .. } => assert_eq!(*casting_level, Some(2)),
            other => panic!("expected spell, got {other:?}"),
        }
    }

    #[test]
    fn skill_by_verb_inference() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Intento escuchar detrás de la puerta", &scene)
            .unwrap();
        match &action.data {
            ActionData::Skill { skill, .. } => assert_eq!(*skill, Some(Skill::Perception)),
            other => panic!("expected skill, got {other:?}"),
        }
        assert!(action.confidence >= 0.85);
        assert!(!action.needs_clarification);
    }

    #[test]
    fn skill_by_accented_name() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Hago una prueba de percepción", &scene)
            .unwrap();
        match &action.data {
            ActionData::Skill { skill, .. } => assert_eq!(*skill, Some(Skill::Perception)),
            other => panic!("expected skill, got {other:?}"),
        }
        assert_eq!(action.confidence, 0.9);
    }

    #[test]
    fn movement_distance_conversions() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let feet = normalizer.normalize("Me muevo 20 pies", &scene).unwrap();
        match &feet.data {
            ActionData::Move { distance_feet, .. } => assert_eq!(*distance_feet, Some(20)),
            other => panic!("expected move, got {other:?}"),
        }

        let metres = normalizer.normalize("Me muevo 5 metros", &scene).unwrap();
        match &metres.data {
            ActionData::Move { distance_feet, .. } => assert_eq!(*distance_feet, Some(16)),
            other => panic!("expected move, got {other:?}"),
        }

        let squares = normalizer.normalize("Avanzo 3 casillas", &scene).unwrap();
        match &squares.data {
            ActionData::Move { distance_feet, .. } => assert_eq!(*distance_feet, Some(15)),
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn movement_destination() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Corro 10 pies hacia la puerta", &scene)
            .unwrap();
        match &action.data {
            ActionData::Move { destination, .. } => {
                assert_eq!(destination.as_deref(), Some("puerta"));
            }
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn generic_action_phrases() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer.normalize("Me pongo a esquivar", &scene).unwrap();
        match &action.data {
            ActionData::GenericAction { action_id, .. } => {
                assert_eq!(*action_id, Some(GenericActionId::Dodge));
            }
            other => panic!("expected generic action, got {other:?}"),
        }
        assert!(!action.needs_clarification);
    }

    #[test]
    fn potion_defaults_to_healing() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer.normalize("Me bebo una poción", &scene).unwrap();
        match &action.data {
            ActionData::UseItem { item_id, .. } => {
                assert_eq!(item_id.as_deref(), Some("pocion_curacion"));
            }
            other => panic!("expected use item, got {other:?}"),
        }
    }

    #[test]
    fn gibberish_is_unknown_and_needs_clarification() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer.normalize("florp glorp", &scene).unwrap();
        assert!(matches!(action.data, ActionData::Unknown { .. }));
        assert_eq!(action.confidence, 0.0);
        assert!(action.needs_clarification);
    }

    #[test]
    fn wire_format_shape() {
        let compendium = compendium();
        let normalizer = Normalizer::new(&compendium);
        let scene = sample_scene();

        let action = normalizer
            .normalize("Ataco al orco con mi espada larga", &scene)
            .unwrap();
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "attack");
        assert_eq!(json["data"]["attacker_id"], scene.actor.id);
        assert_eq!(json["data"]["weapon_id"], "espada_larga");
        assert!(json["confidence"].is_number());
        assert_eq!(json["source"], "pattern");

        let back: CanonicalAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    struct CannedFallback;

    impl NormalizerFallback for CannedFallback {
        fn complete(
            &self,
            _prompt: &str,
            _request: &FallbackRequest,
        ) -> Result<serde_json::Map<String, Value>, FallbackFailure> {
            let mut fields = serde_json::Map::new();
            fields.insert("target_id".into(), Value::String("goblin_1".into()));
            Ok(fields)
        }
    }

    struct FailingFallback;

    impl NormalizerFallback for FailingFallback {
        fn complete(
            &self,
            _prompt: &str,
            _request: &FallbackRequest,
        ) -> Result<serde_json::Map<String, Value>, FallbackFailure> {
            Err(FallbackFailure("connection refused".into()))
        }
    }

    #[test]
    fn fallback_fills_missing_target() {
        let compendium = compendium();
        let fallback = CannedFallback;
        let normalizer = Normalizer::with_fallback(&compendium, &fallback);
        let scene = scene_with_enemies(&[("goblin_1", "Goblin"), ("goblin_archer", "Goblin arquero")]);

        let action = normalizer.normalize("Ataco", &scene).unwrap();
        match &action.data {
            ActionData::Attack { target_id, .. } => {
                assert_eq!(target_id.as_deref(), Some("goblin_1"));
            }
            other => panic!("expected attack, got {other:?}"),
        }
        assert_eq!(action.source, ActionSource::Llm);
        assert!(action.confidence <= 0.9);
        assert!(!action.needs_clarification);
    }

    #[test]
    fn fallback_errors_degrade_to_warnings() {
        let compendium = compendium();
        let fallback = FailingFallback;
        let normalizer = Normalizer::with_fallback(&compendium, &fallback);
        let scene = scene_with_enemies(&[("goblin_1", "Goblin"), ("goblin_archer", "Goblin arquero")]);

        let action = normalizer.normalize("Ataco", &scene).unwrap();
        assert!(action.warnings.iter().any(|w| w.contains("LLM_FAILURE")));
        assert!(action.needs_clarification);
        assert_eq!(action.source, ActionSource::Pattern);
    }
}
