//! Spanish vocabulary tables for the normalizer.
//!
//! Data, not code: adding a synonym means adding a row to a table here.
//! The normalizer never hardcodes words.

use crate::rules::Skill;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// What kind of action a verb points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Attack,
    Spell,
    Move,
    Skill,
    Generic,
    Item,
}

/// The seven generic combat actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericActionId {
    Dash,
    Dodge,
    Disengage,
    Help,
    Hide,
    Search,
    Ready,
}

impl GenericActionId {
    pub fn key(&self) -> &'static str {
        match self {
            GenericActionId::Dash => "dash",
            GenericActionId::Dodge => "dodge",
            GenericActionId::Disengage => "disengage",
            GenericActionId::Help => "help",
            GenericActionId::Hide => "hide",
            GenericActionId::Search => "search",
            GenericActionId::Ready => "ready",
        }
    }

    pub fn from_key(key: &str) -> Option<GenericActionId> {
        Self::all().into_iter().find(|a| a.key() == key)
    }

    pub fn all() -> [GenericActionId; 7] {
        [
            GenericActionId::Dash,
            GenericActionId::Dodge,
            GenericActionId::Disengage,
            GenericActionId::Help,
            GenericActionId::Hide,
            GenericActionId::Search,
            GenericActionId::Ready,
        ]
    }
}

impl fmt::Display for GenericActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Verb → intent kind.
static INTENT_VERBS: LazyLock<HashMap<&'static str, Intent>> = LazyLock::new(|| {
    let mut verbs = HashMap::new();

    for verb in [
        "ataco", "atacar", "ataque", "golpeo", "golpear", "pego", "pegar", "disparo", "disparar",
        "corto", "cortar", "apuñalo", "apuñalar", "hiero", "herir",
    ] {
        verbs.insert(verb, Intent::Attack);
    }

    for verb in [
        "muevo",
        "moverme",
        "mover",
        "camino",
        "caminar",
        "corro",
        "correr",
        "acerco",
        "acercarme",
        "alejo",
        "alejarme",
        "desplazo",
        "desplazarme",
        "voy",
        "ir",
        "avanzo",
        "avanzar",
        "retrocedo",
        "retroceder",
    ] {
        verbs.insert(verb, Intent::Move);
    }

    // Generic spell verbs; specific spells are matched by name first.
    for verb in ["conjuro", "conjurar", "hechizo", "magia", "lanzo", "lanzar"] {
        verbs.insert(verb, Intent::Spell);
    }

    for verb in [
        "escucho",
        "escuchar",
        "oigo",
        "oir",
        "miro",
        "mirar",
        "busco",
        "buscar",
        "examino",
        "examinar",
        "investigo",
        "investigar",
        "persuado",
        "persuadir",
        "persuadirlo",
        "convenzo",
        "convencer",
        "intimido",
        "intimidar",
        "amenazo",
        "amenazar",
        "miento",
        "mentir",
        "engaño",
        "engañar",
        "trepo",
        "trepar",
        "escalo",
        "escalar",
        "salto",
        "saltar",
        "nado",
        "nadar",
    ] {
        verbs.insert(verb, Intent::Skill);
    }

    for verb in ["bebo", "beber", "tomo", "tomar", "uso", "usar"] {
        verbs.insert(verb, Intent::Item);
    }

    verbs
});

/// Verb → specific skill.
static SKILL_VERBS: LazyLock<HashMap<&'static str, Skill>> = LazyLock::new(|| {
    let mut verbs = HashMap::new();

    for verb in [
        "escucho", "escuchar", "oigo", "oir", "miro", "mirar", "observo", "observar", "vigilo",
        "vigilar", "oteo", "otear",
    ] {
        verbs.insert(verb, Skill::Perception);
    }
    for verb in [
        "investigo",
        "investigar",
        "examino",
        "examinar",
        "analizo",
        "analizar",
        "estudio",
        "estudiar",
        "inspecciono",
        "inspeccionar",
    ] {
        verbs.insert(verb, Skill::Investigation);
    }
    for verb in [
        "escondo",
        "esconderme",
        "oculto",
        "ocultarme",
        "sigiloso",
        "sigilosamente",
    ] {
        verbs.insert(verb, Skill::Stealth);
    }
    for verb in [
        "trepo", "trepar", "escalo", "escalar", "salto", "saltar", "nado", "nadar", "empujo",
        "empujar", "forcejeo", "forcejear",
    ] {
        verbs.insert(verb, Skill::Athletics);
    }
    for verb in [
        "ruedo",
        "rodar",
        "voltereta",
        "equilibrio",
        "equilibrarme",
        "pirueta",
    ] {
        verbs.insert(verb, Skill::Acrobatics);
    }
    for verb in [
        "persuado",
        "persuadir",
        "persuadirlo",
        "convenzo",
        "convencer",
        "negocio",
        "negociar",
        "regateo",
        "regatear",
        "halago",
        "halagar",
    ] {
        verbs.insert(verb, Skill::Persuasion);
    }
    for verb in [
        "miento", "mentir", "engaño", "engañar", "finjo", "fingir", "faroleo", "farolear", "timo",
        "timar",
    ] {
        verbs.insert(verb, Skill::Deception);
    }
    for verb in [
        "intimido",
        "intimidar",
        "amenazo",
        "amenazar",
        "asusto",
        "asustar",
        "aterrorizo",
        "aterrorizar",
    ] {
        verbs.insert(verb, Skill::Intimidation);
    }
    for verb in [
        "curo",
        "curar",
        "estabilizo",
        "estabilizar",
        "diagnostico",
        "diagnosticar",
        "vendo",
        "vendar",
    ] {
        verbs.insert(verb, Skill::Medicine);
    }
    for verb in [
        "rastro",
        "rastrear",
        "sigo",
        "seguir",
        "cazo",
        "cazar",
        "forrajeo",
        "forrajear",
    ] {
        verbs.insert(verb, Skill::Survival);
    }
    for verb in [
        "amanso",
        "amansar",
        "domestico",
        "domesticar",
        "calmo",
        "calmar",
    ] {
        verbs.insert(verb, Skill::AnimalHandling);
    }

    verbs
});

/// Phrase → generic action. Ordered so longer phrases win ties.
static GENERIC_ACTION_SYNONYMS: LazyLock<Vec<(&'static str, GenericActionId)>> =
    LazyLock::new(|| {
        vec![
            ("corro todo lo que puedo", GenericActionId::Dash),
            ("correr rápido", GenericActionId::Dash),
            ("correr rapido", GenericActionId::Dash),
            ("carrera", GenericActionId::Dash),
            ("sprint", GenericActionId::Dash),
            ("dash", GenericActionId::Dash),
            ("me pongo a esquivar", GenericActionId::Dodge),
            ("preparo para esquivar", GenericActionId::Dodge),
            ("esquivar", GenericActionId::Dodge),
            ("esquiva", GenericActionId::Dodge),
            ("esquivo", GenericActionId::Dodge),
            ("evadir", GenericActionId::Dodge),
            ("dodge", GenericActionId::Dodge),
            ("retrocedo sin provocar", GenericActionId::Disengage),
            ("desenganche", GenericActionId::Disengage),
            ("retirada", GenericActionId::Disengage),
            ("retirarse", GenericActionId::Disengage),
            ("retirarme", GenericActionId::Disengage),
            ("me retiro", GenericActionId::Disengage),
            ("disengage", GenericActionId::Disengage),
            ("echo una mano", GenericActionId::Help),
            ("ayudar", GenericActionId::Help),
            ("ayuda", GenericActionId::Help),
            ("ayudo", GenericActionId::Help),
            ("asistir", GenericActionId::Help),
            ("asisto", GenericActionId::Help),
            ("help", GenericActionId::Help),
            ("esconderse", GenericActionId::Hide),
            ("esconderme", GenericActionId::Hide),
            ("me escondo", GenericActionId::Hide),
            ("esconder", GenericActionId::Hide),
            ("ocultarme", GenericActionId::Hide),
            ("me oculto", GenericActionId::Hide),
            ("ocultar", GenericActionId::Hide),
            ("hide", GenericActionId::Hide),
            ("registrar", GenericActionId::Search),
            ("registro", GenericActionId::Search),
            ("search", GenericActionId::Search),
            ("preparo una acción", GenericActionId::Ready),
            ("preparar acción", GenericActionId::Ready),
            ("preparar accion", GenericActionId::Ready),
            ("preparar", GenericActionId::Ready),
            ("preparo", GenericActionId::Ready),
            ("ready", GenericActionId::Ready),
        ]
    });

/// Colloquial weapon terms → compendium ids (first id is the default).
static WEAPON_SYNONYMS: LazyLock<Vec<(&'static str, &'static [&'static str])>> =
    LazyLock::new(|| {
        vec![
            ("espadón", &["espada_larga"]),
            ("espada", &["espada_larga", "espada_corta"]),
            ("sable", &["espada_corta"]),
            ("daga", &["daga"]),
            ("cuchillo", &["daga"]),
            ("puñal", &["daga"]),
            ("maza", &["maza"]),
            ("martillo", &["maza"]),
            ("hacha", &["hacha_mano"]),
            ("arco", &["arco_corto"]),
            ("ballesta", &["ballesta_ligera"]),
            ("bastón", &["baston"]),
            ("vara", &["baston"]),
            ("palo", &["baston"]),
        ]
    });

/// Terms that mean an unarmed strike.
const UNARMED_TERMS: [&str; 10] = [
    "desarmado",
    "puño",
    "puñetazo",
    "patada",
    "cabezazo",
    "golpe",
    "mano",
    "codo",
    "rodilla",
    "sin arma",
];

// ============================================================================
// Lookup helpers
// ============================================================================

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whole-word match for single words, substring match for phrases.
fn contains_term(text: &str, term: &str) -> bool {
    if term.contains(' ') {
        return text.contains(term);
    }
    text.split(|c: char| !is_word_char(c)).any(|w| w == term)
}

/// Detect the intent kind from the verbs in (preprocessed) text.
pub fn intent_for(text: &str) -> Option<Intent> {
    // Word-by-word so the earliest verb in the sentence wins.
    for word in text.split(|c: char| !is_word_char(c)) {
        if let Some(intent) = INTENT_VERBS.get(word) {
            return Some(*intent);
        }
    }
    None
}

/// Detect the specific skill from the verbs in the text.
pub fn skill_for(text: &str) -> Option<Skill> {
    for word in text.split(|c: char| !is_word_char(c)) {
        if let Some(skill) = SKILL_VERBS.get(word) {
            return Some(*skill);
        }
    }
    None
}

/// Detect a generic action phrase.
pub fn generic_action_for(text: &str) -> Option<GenericActionId> {
    GENERIC_ACTION_SYNONYMS
        .iter()
        .find(|(term, _)| contains_term(text, term))
        .map(|(_, action)| *action)
}

/// Resolve a colloquial weapon term to its default compendium id.
pub fn weapon_synonym(text: &str) -> Option<&'static str> {
    WEAPON_SYNONYMS
        .iter()
        .find(|(term, _)| contains_term(text, term))
        .map(|(_, ids)| ids[0])
}

/// Whether the text describes an unarmed strike.
pub fn is_unarmed(text: &str) -> bool {
    UNARMED_TERMS.iter().any(|term| contains_term(text, term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_verbs() {
        assert_eq!(intent_for("ataco al orco"), Some(Intent::Attack));
        assert_eq!(intent_for("disparo una flecha"), Some(Intent::Attack));
        assert_eq!(intent_for("me quedo quieto"), None);
    }

    #[test]
    fn earliest_verb_wins() {
        // "corro" (move) appears before "ataco" in the sentence.
        assert_eq!(intent_for("corro y ataco"), Some(Intent::Move));
    }

    #[test]
    fn skill_verbs_map_to_skills() {
        assert_eq!(skill_for("escucho detrás de la puerta"), Some(Skill::Perception));
        assert_eq!(skill_for("trepo por el muro"), Some(Skill::Athletics));
        assert_eq!(skill_for("miento al guardia"), Some(Skill::Deception));
        assert_eq!(skill_for("canto una canción"), None);
    }

    #[test]
    fn generic_actions_match_phrases() {
        assert_eq!(
            generic_action_for("me pongo a esquivar"),
            Some(GenericActionId::Dodge)
        );
        assert_eq!(
            generic_action_for("corro todo lo que puedo"),
            Some(GenericActionId::Dash)
        );
        assert_eq!(generic_action_for("me escondo tras el barril"), Some(GenericActionId::Hide));
        assert_eq!(generic_action_for("ataco"), None);
    }

    #[test]
    fn weapon_synonyms_resolve() {
        assert_eq!(weapon_synonym("saco mi cuchillo"), Some("daga"));
        assert_eq!(weapon_synonym("con la espada"), Some("espada_larga"));
        assert_eq!(weapon_synonym("con el tenedor"), None);
    }

    #[test]
    fn unarmed_terms_are_whole_words() {
        assert!(is_unarmed("le doy un puñetazo"));
        assert!(is_unarmed("ataco sin arma"));
        // "golpeo" must not match the term "golpe".
        assert!(!is_unarmed("golpeo al orco con mi espada"));
    }

    #[test]
    fn generic_action_keys_round_trip() {
        for action in GenericActionId::all() {
            assert_eq!(GenericActionId::from_key(action.key()), Some(action));
        }
    }
}
