//! Solo D&D 5e engine with an injectable narrative DM.
//!
//! A deterministic rules core arbitrates combat while a language model
//! (injected, optional) narrates. The heart of the crate is the turn
//! pipeline: free player text is normalized into a canonical action,
//! validated against the combat state, executed into structured
//! events, and optionally narrated. The combat manager owns all
//! mutable state and applies the pipeline's deltas.
//!
//! # Quick start
//!
//! ```
//! use solodm::combat::{Combatant, CombatantCategory, CombatManager, Environment};
//! use solodm::compendium::Compendium;
//! use solodm::dice::Roller;
//! use solodm::pipeline::{PipelineResult, TurnPipeline};
//! use solodm::testing::sample_fighter_record;
//!
//! let compendium = Compendium::builtin();
//! let mut manager = CombatManager::new(Environment::default());
//!
//! let hero = sample_fighter_record(&compendium);
//! manager.add_combatant(Combatant::from_character(&hero, &compendium)).unwrap();
//! manager
//!     .spawn_from_compendium(&compendium, "orco", None, CombatantCategory::Enemy)
//!     .unwrap();
//!
//! let mut roller = Roller::seeded(7);
//! manager.begin_combat(&mut roller).unwrap();
//!
//! let pipeline = TurnPipeline::new(&compendium);
//! let scene = manager.scene_context().unwrap();
//! match pipeline.process("Ataco al orco con mi espada larga", &scene, &mut roller) {
//!     PipelineResult::Applied(outcome) => {
//!         manager.apply_outcome(&outcome).unwrap();
//!     }
//!     PipelineResult::NeedsClarification { question, .. } => println!("{question}"),
//!     PipelineResult::Rejected { reason, .. } => println!("{reason}"),
//! }
//! ```

pub mod character;
pub mod combat;
pub mod compendium;
pub mod dice;
pub mod narrator;
pub mod normalizer;
pub mod persist;
pub mod pipeline;
pub mod rules;
pub mod testing;
pub mod validator;
pub mod vocabulary;

// Primary public API
pub use combat::{CombatManager, Combatant, CombatantCategory, CombatStatus, Environment};
pub use compendium::Compendium;
pub use dice::{RollMode, RollResult, Roller};
pub use narrator::{NarrationAdapter, Narrator};
pub use normalizer::{CanonicalAction, Normalizer, NormalizerFallback, SceneContext};
pub use pipeline::{Event, PipelineResult, StateDelta, TurnPipeline};
pub use validator::{ErrorCode, Validation, Validator};
