//! Save/load round trips, including a combat frozen mid-fight.

use solodm::combat::{Combatant, CombatManager, CombatStatus, CombatantCategory};
use solodm::dice::Roller;
use solodm::persist::{PersistError, SavedSession, SCHEMA_VERSION};
use solodm::pipeline::{PipelineResult, TurnPipeline};
use solodm::testing::sample_fighter_record;
use solodm::Compendium;

fn mid_combat_session() -> (SavedSession, String, i32) {
    let compendium = Compendium::builtin();
    let character = sample_fighter_record(&compendium);

    let mut manager = CombatManager::default();
    manager
        .add_combatant(Combatant::from_character(&character, &compendium))
        .unwrap();
    let troll_id = manager
        .spawn_from_compendium(&compendium, "troll", None, CombatantCategory::Enemy)
        .unwrap();
    let mut roller = Roller::seeded(11);
    manager.begin_combat(&mut roller).unwrap();

    // Land one attack so the save carries real history and damage.
    let pipeline = TurnPipeline::new(&compendium);
    let mut hp_after = 84;
    for _ in 0..60 {
        let scene = manager.scene_context().unwrap();
        if scene.actor.id != character.id.to_string() {
            manager.end_turn().unwrap();
            continue;
        }
        if let PipelineResult::Applied(outcome) =
            pipeline.process("Ataco al troll con mi espada larga", &scene, &mut roller)
        {
            manager.apply_outcome(&outcome).unwrap();
            let dealt: i32 = outcome
                .state_delta
                .damage
                .iter()
                .filter(|d| d.target_id == troll_id)
                .map(|d| d.amount)
                .sum();
            if dealt > 0 && manager.status() == CombatStatus::Ongoing {
                hp_after = 84 - dealt;
                break;
            }
        }
        manager.end_turn().unwrap();
    }

    let session = SavedSession::new(character, vec![], Some(manager), vec![]);
    (session, troll_id, hp_after)
}

#[test]
fn mid_combat_save_round_trips() {
    let (session, troll_id, hp_after) = mid_combat_session();
    assert!(session.metadata.combat_active);

    let json = session.to_json().unwrap();
    let reloaded = SavedSession::from_json(&json).unwrap();

    let combat = reloaded.combat.as_ref().expect("combat persisted");
    assert_eq!(combat.status(), CombatStatus::Ongoing);
    assert_eq!(combat.combatant(&troll_id).unwrap().hp_current, hp_after);
    assert_eq!(combat.round(), session.combat.as_ref().unwrap().round());

    // serialize → deserialize → serialize is a fixed point.
    assert_eq!(json, reloaded.to_json().unwrap());
}

#[test]
fn reloaded_combat_keeps_playing() {
    let (session, troll_id, _) = mid_combat_session();
    let json = session.to_json().unwrap();
    let mut reloaded = SavedSession::from_json(&json).unwrap();

    let compendium = Compendium::builtin();
    let manager = reloaded.combat.as_mut().unwrap();
    let mut roller = Roller::seeded(77);

    // Whoever is up can still act against the same roster.
    let scene = manager.scene_context().unwrap();
    let pipeline = TurnPipeline::new(&compendium);
    let result = pipeline.process("Ataco", &scene, &mut roller);
    match result {
        PipelineResult::Applied(outcome) => {
            manager.apply_outcome(&outcome).unwrap();
        }
        PipelineResult::NeedsClarification { .. } | PipelineResult::Rejected { .. } => {
            panic!("a plain attack should apply after reload")
        }
    }
    assert!(manager.combatant(&troll_id).is_some());
}

#[test]
fn future_schema_versions_are_refused() {
    let (mut session, _, _) = mid_combat_session();
    session.metadata.schema_version = SCHEMA_VERSION + 1;
    let json = serde_json::to_string(&session).unwrap();

    match SavedSession::from_json(&json) {
        Err(PersistError::VersionMismatch { expected, found }) => {
            assert_eq!(expected, SCHEMA_VERSION);
            assert_eq!(found, SCHEMA_VERSION + 1);
        }
        Err(other) => panic!("wrong error: {other}"),
        Ok(_) => panic!("must refuse unknown versions"),
    }
}
