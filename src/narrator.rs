//! Narration: structured events → prose.
//!
//! The narrator is a capability, not a dependency. When one is
//! injected it gets the events and a thin context; when it is absent
//! or fails, a deterministic Spanish renderer takes over. Narration
//! never changes game state and never turns an applied action into a
//! rejection.

use crate::normalizer::SceneContext;
use crate::pipeline::{CombatOutcome, Event};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Wall-clock budget implementations must honor per call. The engine
/// is synchronous and cannot preempt a callback; on overrun or error
/// the caller falls back to deterministic text.
pub const NARRATION_DEADLINE: Duration = Duration::from_secs(30);

/// Failure reported by a narrator. Degrades to fallback text.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NarrationError(pub String);

/// One combatant as the narrator sees it.
#[derive(Debug, Clone)]
pub struct CombatantStatus {
    pub id: String,
    pub name: String,
    pub hp_current: i32,
}

/// Everything a narrator may look at. No rules knowledge required.
#[derive(Debug, Clone)]
pub struct NarrationContext {
    pub actor_id: String,
    pub actor_name: String,
    pub round: Option<u32>,
    pub combatants: Vec<CombatantStatus>,
}

impl NarrationContext {
    pub fn from_scene(scene: &SceneContext) -> Self {
        let mut combatants = vec![CombatantStatus {
            id: scene.actor.id.clone(),
            name: scene.actor.name.clone(),
            hp_current: scene.actor.hp_current.unwrap_or(0),
        }];
        for other in scene.living_enemies.iter().chain(scene.allies.iter()) {
            combatants.push(CombatantStatus {
                id: other.instance_id.clone(),
                name: other.name.clone(),
                hp_current: other.hp_current,
            });
        }
        Self {
            actor_id: scene.actor.id.clone(),
            actor_name: scene.actor.name.clone(),
            round: None,
            combatants,
        }
    }

    /// Display name for an instance id; the id itself if unknown.
    pub fn name_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.combatants
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
            .unwrap_or(id)
    }
}

/// Injected prose generator. May call an LLM; must stay inside
/// [`NARRATION_DEADLINE`] and must not mutate game state.
pub trait Narrator {
    fn narrate(&self, events: &[Event], context: &NarrationContext)
        -> Result<String, NarrationError>;
}

/// Result of a narration attempt.
#[derive(Debug, Clone)]
pub struct NarrationOutcome {
    pub text: String,
    /// Set when the injected narrator failed and fallback text was
    /// used instead.
    pub warning: Option<String>,
}

/// Wraps an optional narrator with the deterministic fallback.
pub struct NarrationAdapter<'a> {
    narrator: Option<&'a dyn Narrator>,
}

impl<'a> NarrationAdapter<'a> {
    pub fn new(narrator: Option<&'a dyn Narrator>) -> Self {
        Self { narrator }
    }

    /// Best-effort narration: injected narrator first, deterministic
    /// fallback on absence or error.
    pub fn narrate(&self, events: &[Event], context: &NarrationContext) -> NarrationOutcome {
        match self.narrator {
            Some(narrator) => match narrator.narrate(events, context) {
                Ok(text) => NarrationOutcome {
                    text,
                    warning: None,
                },
                Err(err) => {
                    warn!(error = %err, "narrator failed, using fallback text");
                    NarrationOutcome {
                        text: fallback_narration(events, context),
                        warning: Some(format!("LLM_FAILURE: {err}")),
                    }
                }
            },
            None => NarrationOutcome {
                text: fallback_narration(events, context),
                warning: None,
            },
        }
    }
}

/// Deterministic Spanish rendering of an event list.
pub fn fallback_narration(events: &[Event], context: &NarrationContext) -> String {
    let mut sentences = Vec::new();

    for event in events {
        match event {
            Event::AttackRolled {
                actor_id,
                target_id,
                weapon,
                roll,
                target_ac,
                hit,
                critical,
                fumble,
            } => {
                let actor = context.name_of(actor_id);
                let target = context.name_of(target_id);
                let mut sentence = format!(
                    "{actor} ataca a {target} con {weapon}: {} contra CA {target_ac}.",
                    roll.total
                );
                if *critical {
                    sentence.push_str(" ¡Crítico!");
                } else if *fumble {
                    sentence.push_str(" ¡Pifia!");
                } else if *hit {
                    sentence.push_str(" ¡Impacta!");
                }
                sentences.push(sentence);
            }
            Event::DamageDealt {
                target_id,
                amount,
                damage_type,
                ..
            } => {
                sentences.push(format!(
                    "{} sufre {amount} puntos de daño {}.",
                    context.name_of(target_id),
                    damage_type.key()
                ));
            }
            Event::Miss { .. } => {
                sentences.push("El ataque falla.".to_string());
            }
            Event::SpellCast {
                actor_id,
                name,
                casting_level,
                save,
                ..
            } => {
                let mut sentence = if *casting_level > 0 {
                    format!(
                        "{} lanza {name} a nivel {casting_level}.",
                        context.name_of(actor_id)
                    )
                } else {
                    format!("{} lanza {name}.", context.name_of(actor_id))
                };
                if let Some(save) = save {
                    if save.success {
                        sentence.push_str(&format!(
                            " El objetivo supera la salvación (CD {}).",
                            save.dc
                        ));
                    } else {
                        sentence.push_str(&format!(
                            " El objetivo falla la salvación (CD {}).",
                            save.dc
                        ));
                    }
                }
                sentences.push(sentence);
            }
            Event::SlotConsumed { level, .. } => {
                sentences.push(format!("Gasta una ranura de conjuro de nivel {level}."));
            }
            Event::MoveResolved {
                actor_id,
                distance_feet,
                destination,
                ..
            } => {
                let actor = context.name_of(actor_id);
                match destination {
                    Some(destination) => sentences.push(format!(
                        "{actor} se mueve {distance_feet} pies hacia {destination}."
                    )),
                    None => sentences.push(format!("{actor} se mueve {distance_feet} pies.")),
                }
            }
            Event::SkillChecked {
                actor_id,
                skill,
                roll,
                ..
            } => {
                sentences.push(format!(
                    "{} hace una prueba de {}: {}.",
                    context.name_of(actor_id),
                    skill.key(),
                    roll.total
                ));
            }
            Event::GenericActionTaken {
                actor_id,
                action_id,
            } => {
                sentences.push(format!(
                    "{} usa la acción {}.",
                    context.name_of(actor_id),
                    action_id.key()
                ));
            }
            Event::ConditionApplied {
                target_id,
                condition,
                ..
            } => {
                sentences.push(format!(
                    "{} está {}.",
                    context.name_of(target_id),
                    condition.spanish_name()
                ));
            }
            Event::ConditionRemoved {
                target_id,
                condition,
            } => {
                sentences.push(format!(
                    "{} ya no está {}.",
                    context.name_of(target_id),
                    condition.spanish_name()
                ));
            }
            Event::HealingReceived {
                target_id, amount, ..
            } => {
                sentences.push(format!(
                    "{} recupera {amount} puntos de golpe.",
                    context.name_of(target_id)
                ));
            }
            Event::CombatantDown { name, .. } => {
                sentences.push(format!("¡{name} cae!"));
            }
            Event::CombatEnded { outcome, round } => {
                let text = match outcome {
                    CombatOutcome::Victory => "victoria",
                    CombatOutcome::Defeat => "derrota",
                    CombatOutcome::Fled => "huida",
                };
                sentences.push(format!("El combate termina en la ronda {round}: {text}."));
            }
        }
    }

    if sentences.is_empty() {
        format!("{} actúa.", context.actor_name)
    } else {
        sentences.join(" ")
    }
}
