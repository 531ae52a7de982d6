//! Versioned persistence of session state.
//!
//! One save holds the character record, the NPC roster, the combat
//! state (only while a combat is active) and the event history, all as
//! human-readable JSON with an embedded schema version. Unknown
//! versions are rejected on load.

use crate::character::CharacterRecord;
use crate::combat::{Combatant, CombatManager, CombatStatus, HistoryEntry};
use crate::compendium::ItemInstance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Summary block readable without loading the whole save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub character_name: String,
    pub character_level: u8,
    pub combat_active: bool,
}

/// A complete session snapshot.
#[derive(Serialize, Deserialize)]
pub struct SavedSession {
    pub metadata: SaveMetadata,
    pub character: CharacterRecord,
    /// The character's carried item instances.
    #[serde(default)]
    pub inventory: Vec<ItemInstance>,
    /// Allies and neutrals that outlive combats.
    pub npc_roster: Vec<Combatant>,
    /// Present only while a combat is active.
    pub combat: Option<CombatManager>,
    /// Event history carried across combats.
    pub event_history: Vec<HistoryEntry>,
}

impl SavedSession {
    /// Snapshot the session. Finished combats are not persisted.
    pub fn new(
        character: CharacterRecord,
        npc_roster: Vec<Combatant>,
        combat: Option<CombatManager>,
        event_history: Vec<HistoryEntry>,
    ) -> Self {
        let combat = combat.filter(|c| c.status() == CombatStatus::Ongoing);
        let metadata = SaveMetadata {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            character_name: character.source.name.clone(),
            character_level: character.source.level,
            combat_active: combat.is_some(),
        };
        Self {
            metadata,
            character,
            inventory: Vec::new(),
            npc_roster,
            combat,
            event_history,
        }
    }

    /// Attach the carried inventory.
    pub fn with_inventory(mut self, inventory: Vec<ItemInstance>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.schema_version != SCHEMA_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: session.metadata.schema_version,
            });
        }
        Ok(session)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Read just the metadata block, cheaply.
    pub fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        #[derive(Deserialize)]
        struct Partial {
            metadata: SaveMetadata,
        }
        let content = fs::read_to_string(path)?;
        let partial: Partial = serde_json::from_str(&content)?;
        if partial.metadata.schema_version != SCHEMA_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: partial.metadata.schema_version,
            });
        }
        Ok(partial.metadata)
    }
}

/// Injected character storage.
pub trait CharacterRepository {
    fn load(&self, id: &str) -> Result<Option<CharacterRecord>, PersistError>;
    fn save(&self, character: &CharacterRecord) -> Result<(), PersistError>;
}

/// One JSON file per character under a directory.
pub struct FileCharacterRepository {
    dir: std::path::PathBuf,
}

impl FileCharacterRepository {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> std::path::PathBuf {
        let sanitized: String = id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }
}

impl CharacterRepository for FileCharacterRepository {
    fn load(&self, id: &str) -> Result<Option<CharacterRecord>, PersistError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, character: &CharacterRecord) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&character.id.to_string());
        fs::write(path, serde_json::to_string_pretty(character)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compendium::Compendium;
    use crate::testing::sample_fighter_record;

    #[test]
    fn session_round_trip_is_a_fixed_point() {
        let compendium = Compendium::builtin();
        let character = sample_fighter_record(&compendium);
        let session = SavedSession::new(character, vec![], None, vec![]);

        let first = session.to_json().unwrap();
        let reloaded = SavedSession::from_json(&first).unwrap();
        let second = reloaded.to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let compendium = Compendium::builtin();
        let character = sample_fighter_record(&compendium);
        let mut session = SavedSession::new(character, vec![], None, vec![]);
        session.metadata.schema_version = 99;

        let json = serde_json::to_string(&session).unwrap();
        match SavedSession::from_json(&json) {
            Err(PersistError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SCHEMA_VERSION);
                assert_eq!(found, 99);
            }
            other => panic!("expected version mismatch, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn finished_combat_is_not_persisted() {
        use crate::combat::{CombatantCategory, CombatManager};
        use crate::dice::Roller;
        use crate::pipeline::CombatOutcome;

        let compendium = Compendium::builtin();
        let character = sample_fighter_record(&compendium);

        let mut manager = CombatManager::default();
        manager
            .add_combatant(crate::combat::Combatant::from_character(
                &character,
                &compendium,
            ))
            .unwrap();
        manager
            .spawn_from_compendium(&compendium, "goblin", None, CombatantCategory::Enemy)
            .unwrap();
        let mut roller = Roller::seeded(2);
        manager.begin_combat(&mut roller).unwrap();
        manager.end_combat(CombatOutcome::Fled);

        let session = SavedSession::new(character, vec![], Some(manager), vec![]);
        assert!(session.combat.is_none());
        assert!(!session.metadata.combat_active);
    }

    #[test]
    fn save_and_load_from_disk() {
        let compendium = Compendium::builtin();
        let character = sample_fighter_record(&compendium);
        let name = character.source.name.clone();
        let potion = compendium.create_item_instance("pocion_curacion", 2).unwrap();
        let session = SavedSession::new(character, vec![], None, vec![]).with_inventory(vec![potion]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partida.json");
        session.save_json(&path).unwrap();

        let metadata = SavedSession::peek_metadata(&path).unwrap();
        assert_eq!(metadata.character_name, name);
        assert_eq!(metadata.character_level, 3);

        let loaded = SavedSession::load_json(&path).unwrap();
        assert_eq!(loaded.character.source.name, name);
        assert_eq!(loaded.inventory.len(), 1);
        assert_eq!(loaded.inventory[0].quantity, 2);
    }

    #[test]
    fn file_repository_round_trip() {
        let compendium = Compendium::builtin();
        let character = sample_fighter_record(&compendium);
        let id = character.id.to_string();

        let dir = tempfile::tempdir().unwrap();
        let repository = FileCharacterRepository::new(dir.path());

        assert!(repository.load(&id).unwrap().is_none());
        repository.save(&character).unwrap();
        let loaded = repository.load(&id).unwrap().unwrap();
        assert_eq!(loaded.id, character.id);
        assert_eq!(loaded.derived, character.derived);
    }
}
