//! Game content: weapons, armor, spells, monsters and items.
//!
//! The compendium is read-only after load. It answers lookups and mints
//! play instances (fresh `instance_id` + `compendium_ref`); it never
//! computes rule consequences. Spell upcasting, attack math and the
//! like belong to the combat rules.
//!
//! Entries deserialize from the Spanish content schema (`nombre`,
//! `daño`, `puntos_golpe`, ...).

use crate::rules::{Ability, AbilityScores, ArmorAc, Condition, DamageType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while loading content.
#[derive(Debug, Error)]
pub enum CompendiumError {
    #[error("Malformed content bundle: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Duplicate entry id '{0}'")]
    DuplicateId(String),
}

// ============================================================================
// Entries
// ============================================================================

/// Weapon properties (Spanish content keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponProperty {
    #[serde(rename = "sutil")]
    Finesse,
    #[serde(rename = "ligera")]
    Light,
    #[serde(rename = "pesada")]
    Heavy,
    #[serde(rename = "arrojadiza")]
    Thrown,
    #[serde(rename = "a_dos_manos")]
    TwoHanded,
    #[serde(rename = "versatil")]
    Versatile,
    #[serde(rename = "municion")]
    Ammunition,
    #[serde(rename = "recarga")]
    Loading,
    #[serde(rename = "alcance")]
    Reach,
}

/// A weapon as written in the compendium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponEntry {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "daño")]
    pub damage: String,
    #[serde(rename = "tipo_daño")]
    pub damage_type: DamageType,
    #[serde(rename = "propiedades", default)]
    pub properties: Vec<WeaponProperty>,
    /// "5" for melee reach, "80/320" for ranged distances (feet).
    #[serde(rename = "alcance", default)]
    pub range: Option<String>,
    #[serde(rename = "peso", default)]
    pub weight_lb: f32,
    #[serde(rename = "descripcion", default)]
    pub description: String,
    #[serde(default)]
    pub is_magical: bool,
}

impl WeaponEntry {
    pub fn is_finesse(&self) -> bool {
        self.properties.contains(&WeaponProperty::Finesse)
    }

    pub fn is_ranged(&self) -> bool {
        self.properties.contains(&WeaponProperty::Ammunition)
            || self.range.as_deref().is_some_and(|r| r.contains('/'))
    }
}

/// An armor as written in the compendium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmorEntry {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "ca_base")]
    pub base_ac: i32,
    #[serde(rename = "max_mod_destreza", default)]
    pub max_dex_bonus: Option<i32>,
    #[serde(rename = "requisito_fuerza", default)]
    pub strength_requirement: Option<u8>,
    #[serde(rename = "desventaja_sigilo", default)]
    pub stealth_disadvantage: bool,
    #[serde(rename = "peso", default)]
    pub weight_lb: f32,
    #[serde(rename = "descripcion", default)]
    pub description: String,
    #[serde(default)]
    pub is_magical: bool,
}

impl ArmorEntry {
    pub fn ac(&self) -> ArmorAc {
        ArmorAc {
            base: self.base_ac,
            max_dex_bonus: self.max_dex_bonus,
        }
    }
}

/// A shield.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldEntry {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "bonificador_ca")]
    pub ac_bonus: i32,
    #[serde(rename = "peso", default)]
    pub weight_lb: f32,
    #[serde(rename = "descripcion", default)]
    pub description: String,
    #[serde(default)]
    pub is_magical: bool,
}

/// How a spell resolves against its target, when it deals damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellAttackKind {
    Melee,
    Ranged,
}

/// A spell as written in the compendium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellEntry {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    /// 0 = cantrip.
    #[serde(rename = "nivel")]
    pub level: u8,
    /// Target kind: "criatura", "personal", "area", ...
    #[serde(rename = "objetivo", default)]
    pub target: String,
    #[serde(rename = "daño", default)]
    pub damage: Option<String>,
    #[serde(rename = "tipo_daño", default)]
    pub damage_type: Option<DamageType>,
    /// Extra damage dice per slot level above base. Present in content
    /// but not yet consumed by the executor.
    #[serde(rename = "escalado", default)]
    pub scaling: Option<String>,
    #[serde(rename = "ataque", default)]
    pub attack: Option<SpellAttackKind>,
    /// Saving throw ability, when the spell forces a save.
    #[serde(rename = "salvacion", default)]
    pub save: Option<Ability>,
    #[serde(rename = "mitad_si_salva", default)]
    pub half_on_save: bool,
    #[serde(rename = "objetivos", default = "default_target_count")]
    pub target_count: u8,
    #[serde(rename = "concentracion", default)]
    pub concentration: bool,
    #[serde(rename = "descripcion", default)]
    pub description: String,
}

fn default_target_count() -> u8 {
    1
}

impl SpellEntry {
    pub fn is_cantrip(&self) -> bool {
        self.level == 0
    }

    /// Whether casting the spell needs a creature target.
    pub fn requires_target(&self) -> bool {
        !matches!(self.target.as_str(), "" | "personal" | "self")
    }
}

/// An attack from a monster stat block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterAction {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "bonificador_ataque", default)]
    pub attack_bonus: Option<i32>,
    #[serde(rename = "daño", default)]
    pub damage: Option<String>,
    #[serde(rename = "tipo_daño", default)]
    pub damage_type: Option<DamageType>,
    /// "5" for melee reach, "80/320" for ranged distances (feet).
    #[serde(rename = "alcance", default)]
    pub range: Option<String>,
    #[serde(rename = "descripcion", default)]
    pub description: String,
}

impl MonsterAction {
    pub fn is_attack(&self) -> bool {
        self.attack_bonus.is_some()
    }

    pub fn is_ranged(&self) -> bool {
        self.range.as_deref().is_some_and(|r| r.contains('/'))
    }
}

/// A monster trait.
///
/// Two tiers: the structured variants cover the mechanics the engine
/// understands; everything else arrives as `TextOnly` with the original
/// wording plus tags, and must flow through the pipeline untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonsterTrait {
    DamageResistances { types: Vec<DamageType> },
    DamageImmunities { types: Vec<DamageType> },
    DamageVulnerabilities { types: Vec<DamageType> },
    /// An action that recharges on a die roll of `min_roll` or higher.
    Recharge { action: String, min_roll: u8 },
    /// Regains `hit_points` at the start of its turn.
    Regeneration { hit_points: u32 },
    /// Grants advantage or disadvantage on a named roll.
    RollModifier { roll: String, advantage: bool },
    /// Darkvision, blindsight, tremorsense, ...
    Sense { sense: String, range_feet: u32 },
    TextOnly {
        name: String,
        text: String,
        #[serde(default)]
        tags: Vec<String>,
    },
}

/// A monster as written in the compendium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterEntry {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "puntos_golpe")]
    pub hit_points: i32,
    #[serde(rename = "clase_armadura")]
    pub armor_class: i32,
    #[serde(rename = "velocidad", default = "default_speed")]
    pub speed: u32,
    #[serde(rename = "atributos")]
    pub abilities: AbilityScores,
    #[serde(rename = "desafio", default)]
    pub challenge: Option<String>,
    /// XP awarded on defeat.
    #[serde(rename = "px", default)]
    pub xp: u32,
    #[serde(rename = "acciones", default)]
    pub actions: Vec<MonsterAction>,
    #[serde(rename = "rasgos", default)]
    pub traits: Vec<MonsterTrait>,
    #[serde(rename = "descripcion", default)]
    pub description: String,
}

fn default_speed() -> u32 {
    30
}

/// Effect of a consumable item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tipo")]
pub enum ItemEffect {
    #[serde(rename = "curacion")]
    Healing {
        #[serde(rename = "cantidad")]
        amount: String,
    },
    #[serde(rename = "daño")]
    Damage {
        #[serde(rename = "cantidad")]
        amount: String,
        #[serde(rename = "tipo_daño")]
        damage_type: DamageType,
    },
    #[serde(rename = "condicion")]
    ApplyCondition {
        #[serde(rename = "condicion")]
        condition: Condition,
    },
}

/// A miscellaneous item as written in the compendium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEntry {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "peso", default)]
    pub weight_lb: f32,
    #[serde(rename = "descripcion", default)]
    pub description: String,
    #[serde(rename = "categoria", default)]
    pub category: String,
    #[serde(rename = "efecto", default)]
    pub effect: Option<ItemEffect>,
    /// For charged items; `None` means single-use or passive.
    #[serde(rename = "cargas", default)]
    pub charges: Option<u32>,
    #[serde(default)]
    pub is_magical: bool,
}

// ============================================================================
// Store
// ============================================================================

/// Read-only lookup interface over the content categories.
pub trait CompendiumStore: Send + Sync {
    fn weapon(&self, id: &str) -> Option<&WeaponEntry>;
    fn armor(&self, id: &str) -> Option<&ArmorEntry>;
    fn shield(&self, id: &str) -> Option<&ShieldEntry>;
    fn spell(&self, id: &str) -> Option<&SpellEntry>;
    fn monster(&self, id: &str) -> Option<&MonsterEntry>;
    fn item(&self, id: &str) -> Option<&ItemEntry>;

    fn weapons(&self) -> Vec<&WeaponEntry>;
    fn spells(&self) -> Vec<&SpellEntry>;
    fn items(&self) -> Vec<&ItemEntry>;
}

/// JSON shape of a content bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBundle {
    #[serde(rename = "armas", default)]
    pub weapons: Vec<WeaponEntry>,
    #[serde(rename = "armaduras", default)]
    pub armors: Vec<ArmorEntry>,
    #[serde(rename = "escudos", default)]
    pub shields: Vec<ShieldEntry>,
    #[serde(rename = "conjuros", default)]
    pub spells: Vec<SpellEntry>,
    #[serde(rename = "monstruos", default)]
    pub monsters: Vec<MonsterEntry>,
    #[serde(rename = "objetos", default)]
    pub items: Vec<ItemEntry>,
}

/// In-memory content store, loaded once at startup.
pub struct InMemoryStore {
    weapons: HashMap<String, WeaponEntry>,
    armors: HashMap<String, ArmorEntry>,
    shields: HashMap<String, ShieldEntry>,
    spells: HashMap<String, SpellEntry>,
    monsters: HashMap<String, MonsterEntry>,
    items: HashMap<String, ItemEntry>,
    // Listing order follows insertion so literal-name matching is stable.
    weapon_order: Vec<String>,
    spell_order: Vec<String>,
    item_order: Vec<String>,
}

impl InMemoryStore {
    pub fn from_bundle(bundle: ContentBundle) -> Result<Self, CompendiumError> {
        let mut store = Self {
            weapons: HashMap::new(),
            armors: HashMap::new(),
            shields: HashMap::new(),
            spells: HashMap::new(),
            monsters: HashMap::new(),
            items: HashMap::new(),
            weapon_order: Vec::new(),
            spell_order: Vec::new(),
            item_order: Vec::new(),
        };

        for entry in bundle.weapons {
            if store.weapons.contains_key(&entry.id) {
                return Err(CompendiumError::DuplicateId(entry.id));
            }
            store.weapon_order.push(entry.id.clone());
            store.weapons.insert(entry.id.clone(), entry);
        }
        for entry in bundle.armors {
            if store
                .armors
                .insert(entry.id.clone(), entry.clone())
                .is_some()
            {
                return Err(CompendiumError::DuplicateId(entry.id));
            }
        }
        for entry in bundle.shields {
            if store
                .shields
                .insert(entry.id.clone(), entry.clone())
                .is_some()
            {
                return Err(CompendiumError::DuplicateId(entry.id));
            }
        }
        for entry in bundle.spells {
            if store.spells.contains_key(&entry.id) {
                return Err(CompendiumError::DuplicateId(entry.id));
            }
            store.spell_order.push(entry.id.clone());
            store.spells.insert(entry.id.clone(), entry);
        }
        for entry in bundle.monsters {
            if store
                .monsters
                .insert(entry.id.clone(), entry.clone())
                .is_some()
            {
                return Err(CompendiumError::DuplicateId(entry.id));
            }
        }
        for entry in bundle.items {
            if store.items.contains_key(&entry.id) {
                return Err(CompendiumError::DuplicateId(entry.id));
            }
            store.item_order.push(entry.id.clone());
            store.items.insert(entry.id.clone(), entry);
        }

        Ok(store)
    }

    /// Bulk-load a JSON content bundle.
    pub fn from_json(json: &str) -> Result<Self, CompendiumError> {
        let bundle: ContentBundle = serde_json::from_str(json)?;
        Self::from_bundle(bundle)
    }
}

impl CompendiumStore for InMemoryStore {
    fn weapon(&self, id: &str) -> Option<&WeaponEntry> {
        self.weapons.get(id)
    }

    fn armor(&self, id: &str) -> Option<&ArmorEntry> {
        self.armors.get(id)
    }

    fn shield(&self, id: &str) -> Option<&ShieldEntry> {
        self.shields.get(id)
    }

    fn spell(&self, id: &str) -> Option<&SpellEntry> {
        self.spells.get(id)
    }

    fn monster(&self, id: &str) -> Option<&MonsterEntry> {
        self.monsters.get(id)
    }

    fn item(&self, id: &str) -> Option<&ItemEntry> {
        self.items.get(id)
    }

    fn weapons(&self) -> Vec<&WeaponEntry> {
        self.weapon_order
            .iter()
            .filter_map(|id| self.weapons.get(id))
            .collect()
    }

    fn spells(&self) -> Vec<&SpellEntry> {
        self.spell_order
            .iter()
            .filter_map(|id| self.spells.get(id))
            .collect()
    }

    fn items(&self) -> Vec<&ItemEntry> {
        self.item_order
            .iter()
            .filter_map(|id| self.items.get(id))
            .collect()
    }
}

// ============================================================================
// Instances
// ============================================================================

/// A monster materialized for a combat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterInstance {
    pub instance_id: String,
    pub compendium_ref: Option<String>,
    pub name: String,
    pub hp_max: i32,
    pub hp_current: i32,
    pub armor_class: i32,
    pub abilities: AbilityScores,
    pub actions: Vec<MonsterAction>,
    pub traits: Vec<MonsterTrait>,
    pub speed: u32,
    pub conditions: HashSet<Condition>,
    pub xp: u32,
}

/// A weapon materialized for an inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponInstance {
    pub instance_id: String,
    pub compendium_ref: Option<String>,
    pub name: String,
    pub damage: String,
    pub damage_type: DamageType,
    pub properties: Vec<WeaponProperty>,
    pub magic_bonus: Option<i32>,
}

/// A miscellaneous item materialized for an inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInstance {
    pub instance_id: String,
    pub compendium_ref: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub charges: Option<u32>,
    pub weight_lb: f32,
    pub is_magical: bool,
}

fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Adapter
// ============================================================================

/// The engine's view of the content store.
///
/// Delegates lookups and mints play instances. Never mutates entries.
pub struct Compendium {
    store: Box<dyn CompendiumStore>,
}

impl Compendium {
    pub fn new(store: Box<dyn CompendiumStore>) -> Self {
        Self { store }
    }

    /// The built-in SRD-subset content.
    pub fn builtin() -> Self {
        Self::new(Box::new(
            InMemoryStore::from_bundle(builtin_bundle()).expect("builtin content is well formed"),
        ))
    }

    pub fn weapon(&self, id: &str) -> Option<&WeaponEntry> {
        self.store.weapon(id)
    }

    pub fn armor(&self, id: &str) -> Option<&ArmorEntry> {
        self.store.armor(id)
    }

    pub fn shield(&self, id: &str) -> Option<&ShieldEntry> {
        self.store.shield(id)
    }

    pub fn spell(&self, id: &str) -> Option<&SpellEntry> {
        self.store.spell(id)
    }

    pub fn monster(&self, id: &str) -> Option<&MonsterEntry> {
        self.store.monster(id)
    }

    pub fn item(&self, id: &str) -> Option<&ItemEntry> {
        self.store.item(id)
    }

    pub fn weapons(&self) -> Vec<&WeaponEntry> {
        self.store.weapons()
    }

    pub fn spells(&self) -> Vec<&SpellEntry> {
        self.store.spells()
    }

    pub fn items(&self) -> Vec<&ItemEntry> {
        self.store.items()
    }

    /// Materialize a monster for combat. Fresh `instance_id`, full HP,
    /// a snapshot of the stat block, empty conditions.
    pub fn create_monster_instance(
        &self,
        monster_id: &str,
        custom_name: Option<&str>,
    ) -> Option<MonsterInstance> {
        let entry = self.store.monster(monster_id)?;
        Some(MonsterInstance {
            instance_id: new_instance_id(),
            compendium_ref: Some(entry.id.clone()),
            name: custom_name.unwrap_or(&entry.name).to_string(),
            hp_max: entry.hit_points,
            hp_current: entry.hit_points,
            armor_class: entry.armor_class,
            abilities: entry.abilities.clone(),
            actions: entry.actions.clone(),
            traits: entry.traits.clone(),
            speed: entry.speed,
            conditions: HashSet::new(),
            xp: entry.xp,
        })
    }

    /// Materialize a weapon for an inventory.
    pub fn create_weapon_instance(&self, weapon_id: &str) -> Option<WeaponInstance> {
        let entry = self.store.weapon(weapon_id)?;
        Some(WeaponInstance {
            instance_id: new_instance_id(),
            compendium_ref: Some(entry.id.clone()),
            name: entry.name.clone(),
            damage: entry.damage.clone(),
            damage_type: entry.damage_type,
            properties: entry.properties.clone(),
            magic_bonus: None,
        })
    }

    /// Materialize an item for an inventory.
    pub fn create_item_instance(&self, item_id: &str, quantity: u32) -> Option<ItemInstance> {
        let entry = self.store.item(item_id)?;
        Some(ItemInstance {
            instance_id: new_instance_id(),
            compendium_ref: Some(entry.id.clone()),
            name: entry.name.clone(),
            quantity,
            charges: entry.charges,
            weight_lb: entry.weight_lb,
            is_magical: entry.is_magical,
        })
    }
}

// ============================================================================
// Built-in content
// ============================================================================

const BUILTIN_JSON: &str = r##"{
  "armas": [
    {"id": "espada_larga", "nombre": "Espada larga", "daño": "1d8", "tipo_daño": "cortante",
     "propiedades": ["versatil"], "alcance": "5", "peso": 3.0,
     "descripcion": "Hoja recta de doble filo."},
    {"id": "espada_corta", "nombre": "Espada corta", "daño": "1d6", "tipo_daño": "perforante",
     "propiedades": ["sutil", "ligera"], "alcance": "5", "peso": 2.0,
     "descripcion": "Hoja corta para estocadas rápidas."},
    {"id": "daga", "nombre": "Daga", "daño": "1d4", "tipo_daño": "perforante",
     "propiedades": ["sutil", "ligera", "arrojadiza"], "alcance": "20/60", "peso": 1.0,
     "descripcion": "Cuchilla ligera, fácil de ocultar."},
    {"id": "maza", "nombre": "Maza", "daño": "1d6", "tipo_daño": "contundente",
     "alcance": "5", "peso": 4.0, "descripcion": "Cabeza de metal sobre mango corto."},
    {"id": "hacha_mano", "nombre": "Hacha de mano", "daño": "1d6", "tipo_daño": "cortante",
     "propiedades": ["ligera", "arrojadiza"], "alcance": "20/60", "peso": 2.0,
     "descripcion": "Hacha pequeña, útil cuerpo a cuerpo o lanzada."},
    {"id": "arco_corto", "nombre": "Arco corto", "daño": "1d6", "tipo_daño": "perforante",
     "propiedades": ["municion", "a_dos_manos"], "alcance": "80/320", "peso": 2.0,
     "descripcion": "Arco ligero de caza."},
    {"id": "ballesta_ligera", "nombre": "Ballesta ligera", "daño": "1d8", "tipo_daño": "perforante",
     "propiedades": ["municion", "recarga", "a_dos_manos"], "alcance": "80/320", "peso": 5.0,
     "descripcion": "Ballesta de una mano y media."},
    {"id": "baston", "nombre": "Bastón", "daño": "1d6", "tipo_daño": "contundente",
     "propiedades": ["versatil"], "alcance": "5", "peso": 4.0,
     "descripcion": "Vara de madera endurecida."}
  ],
  "armaduras": [
    {"id": "cuero", "nombre": "Armadura de cuero", "ca_base": 11, "peso": 10.0,
     "descripcion": "Cuero endurecido en aceite."},
    {"id": "cuero_tachonado", "nombre": "Cuero tachonado", "ca_base": 12, "peso": 13.0,
     "descripcion": "Cuero reforzado con remaches."},
    {"id": "cota_escamas", "nombre": "Cota de escamas", "ca_base": 14, "max_mod_destreza": 2,
     "desventaja_sigilo": true, "peso": 45.0, "descripcion": "Escamas metálicas superpuestas."},
    {"id": "cota_malla", "nombre": "Cota de malla", "ca_base": 16, "max_mod_destreza": 0,
     "requisito_fuerza": 13, "desventaja_sigilo": true, "peso": 55.0,
     "descripcion": "Anillas entrelazadas de acero."}
  ],
  "escudos": [
    {"id": "escudo", "nombre": "Escudo", "bonificador_ca": 2, "peso": 6.0,
     "descripcion": "Escudo de madera y acero."}
  ],
  "conjuros": [
    {"id": "proyectil_magico", "nombre": "Proyectil mágico", "nivel": 1, "objetivo": "criatura",
     "daño": "3d4+3", "tipo_daño": "fuerza", "escalado": "1d4+1", "objetivos": 3,
     "descripcion": "Tres dardos de fuerza que impactan sin fallar."},
    {"id": "manos_ardientes", "nombre": "Manos ardientes", "nivel": 1, "objetivo": "area",
     "daño": "3d6", "tipo_daño": "fuego", "escalado": "1d6", "salvacion": "dexterity",
     "mitad_si_salva": true, "descripcion": "Abanico de llamas desde las manos."},
    {"id": "bola_de_fuego", "nombre": "Bola de fuego", "nivel": 3, "objetivo": "area",
     "daño": "8d6", "tipo_daño": "fuego", "escalado": "1d6", "salvacion": "dexterity",
     "mitad_si_salva": true, "descripcion": "Explosión de fuego en una esfera de 20 pies."},
    {"id": "rayo_de_escarcha", "nombre": "Rayo de escarcha", "nivel": 0, "objetivo": "criatura",
     "daño": "1d8", "tipo_daño": "frio", "ataque": "ranged",
     "descripcion": "Haz de aire gélido que ralentiza al objetivo."},
    {"id": "toque_helado", "nombre": "Toque helado", "nivel": 0, "objetivo": "criatura",
     "daño": "1d8", "tipo_daño": "necrotico", "ataque": "ranged",
     "descripcion": "Mano espectral que aferra al objetivo."},
    {"id": "luz", "nombre": "Luz", "nivel": 0, "objetivo": "personal",
     "descripcion": "Un objeto brilla como una antorcha durante una hora."}
  ],
  "monstruos": [
    {"id": "orco", "nombre": "Orco", "puntos_golpe": 15, "clase_armadura": 13,
     "velocidad": 30, "px": 100, "desafio": "1/2",
     "atributos": {"fuerza": 16, "destreza": 12, "constitucion": 16,
                   "inteligencia": 7, "sabiduria": 11, "carisma": 10},
     "acciones": [
       {"nombre": "Gran hacha", "bonificador_ataque": 5, "daño": "1d12+3",
        "tipo_daño": "cortante", "alcance": "5"},
       {"nombre": "Jabalina", "bonificador_ataque": 5, "daño": "1d6+3",
        "tipo_daño": "perforante", "alcance": "30/120"}
     ],
     "rasgos": [
       {"kind": "text_only", "name": "Agresivo",
        "text": "Como acción bonus, el orco puede moverse hasta su velocidad hacia un enemigo que pueda ver.",
        "tags": ["movimiento", "accion_bonus"]}
     ],
     "descripcion": "Guerrero brutal de las tribus de las montañas."},
    {"id": "goblin", "nombre": "Goblin", "puntos_golpe": 7, "clase_armadura": 15,
     "velocidad": 30, "px": 50, "desafio": "1/4",
     "atributos": {"fuerza": 8, "destreza": 14, "constitucion": 10,
                   "inteligencia": 10, "sabiduria": 8, "carisma": 8},
     "acciones": [
       {"nombre": "Cimitarra", "bonificador_ataque": 4, "daño": "1d6+2",
        "tipo_daño": "cortante", "alcance": "5"},
       {"nombre": "Arco corto", "bonificador_ataque": 4, "daño": "1d6+2",
        "tipo_daño": "perforante", "alcance": "80/320"}
     ],
     "rasgos": [
       {"kind": "text_only", "name": "Escapada ágil",
        "text": "El goblin puede usar Disengage o Hide como acción bonus en cada uno de sus turnos.",
        "tags": ["accion_bonus"]}
     ],
     "descripcion": "Pequeño humanoide malicioso de cuevas y ruinas."},
    {"id": "esqueleto", "nombre": "Esqueleto", "puntos_golpe": 13, "clase_armadura": 13,
     "velocidad": 30, "px": 50, "desafio": "1/4",
     "atributos": {"fuerza": 10, "destreza": 14, "constitucion": 15,
                   "inteligencia": 6, "sabiduria": 8, "carisma": 5},
     "acciones": [
       {"nombre": "Espada corta", "bonificador_ataque": 4, "daño": "1d6+2",
        "tipo_daño": "perforante", "alcance": "5"}
     ],
     "rasgos": [
       {"kind": "damage_vulnerabilities", "types": ["contundente"]},
       {"kind": "damage_immunities", "types": ["veneno"]},
       {"kind": "sense", "sense": "vision_oscuridad", "range_feet": 60}
     ],
     "descripcion": "Restos animados por nigromancia."},
    {"id": "troll", "nombre": "Troll", "puntos_golpe": 84, "clase_armadura": 15,
     "velocidad": 30, "px": 1800, "desafio": "5",
     "atributos": {"fuerza": 18, "destreza": 13, "constitucion": 20,
                   "inteligencia": 7, "sabiduria": 9, "carisma": 7},
     "acciones": [
       {"nombre": "Garra", "bonificador_ataque": 7, "daño": "2d6+4",
        "tipo_daño": "cortante", "alcance": "5"},
       {"nombre": "Mordisco", "bonificador_ataque": 7, "daño": "1d6+4",
        "tipo_daño": "perforante", "alcance": "5"}
     ],
     "rasgos": [
       {"kind": "regeneration", "hit_points": 10},
       {"kind": "sense", "sense": "vision_oscuridad", "range_feet": 60},
       {"kind": "text_only", "name": "Olfato agudo",
        "text": "El troll tiene ventaja en pruebas de Sabiduría (Percepción) basadas en el olfato.",
        "tags": ["percepcion"]}
     ],
     "descripcion": "Gigante voraz que regenera sus heridas."}
  ],
  "objetos": [
    {"id": "pocion_curacion", "nombre": "Poción de curación", "peso": 0.5,
     "categoria": "consumible", "is_magical": true,
     "efecto": {"tipo": "curacion", "cantidad": "2d4+2"},
     "descripcion": "Líquido rojo que restaura puntos de golpe al beberlo."},
    {"id": "fuego_alquimico", "nombre": "Fuego de alquimista", "peso": 1.0,
     "categoria": "consumible",
     "efecto": {"tipo": "daño", "cantidad": "1d4", "tipo_daño": "fuego"},
     "descripcion": "Frasco de líquido adhesivo que arde al romperse."},
    {"id": "antorcha", "nombre": "Antorcha", "peso": 1.0, "categoria": "equipo",
     "descripcion": "Ilumina 20 pies durante una hora."},
    {"id": "cuerda", "nombre": "Cuerda de cáñamo", "peso": 10.0, "categoria": "equipo",
     "descripcion": "50 pies de cuerda resistente."}
  ]
}"##;

/// The parsed built-in bundle, shared by every `Compendium::builtin()`.
static BUILTIN_BUNDLE: LazyLock<ContentBundle> =
    LazyLock::new(|| serde_json::from_str(BUILTIN_JSON).expect("builtin content parses"));

fn builtin_bundle() -> ContentBundle {
    BUILTIN_BUNDLE.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_content_loads() {
        let compendium = Compendium::builtin();
        assert!(compendium.weapon("espada_larga").is_some());
        assert!(compendium.armor("cuero").is_some());
        assert!(compendium.shield("escudo").is_some());
        assert!(compendium.spell("proyectil_magico").is_some());
        assert!(compendium.monster("orco").is_some());
        assert!(compendium.item("pocion_curacion").is_some());
        assert!(compendium.weapon("espada_laser").is_none());
    }

    #[test]
    fn weapon_predicates() {
        let compendium = Compendium::builtin();
        let dagger = compendium.weapon("daga").unwrap();
        assert!(dagger.is_finesse());
        assert!(!dagger.is_ranged());
        let bow = compendium.weapon("arco_corto").unwrap();
        assert!(bow.is_ranged());
        assert!(!bow.is_finesse());
    }

    #[test]
    fn monster_instances_are_fresh() {
        let compendium = Compendium::builtin();
        let first = compendium.create_monster_instance("orco", None).unwrap();
        let second = compendium.create_monster_instance("orco", None).unwrap();

        assert_ne!(first.instance_id, second.instance_id);
        assert_eq!(first.compendium_ref.as_deref(), Some("orco"));
        assert_eq!(first.hp_current, first.hp_max);
        assert_eq!(first.hp_max, 15);
        assert_eq!(first.armor_class, 13);
        assert!(first.conditions.is_empty());
        assert_eq!(first.actions.len(), 2);
    }

    #[test]
    fn monster_instance_named() {
        let compendium = Compendium::builtin();
        let named = compendium
            .create_monster_instance("goblin", Some("Goblin arquero"))
            .unwrap();
        assert_eq!(named.name, "Goblin arquero");
        assert_eq!(named.compendium_ref.as_deref(), Some("goblin"));
    }

    #[test]
    fn weapon_instance_copies_entry() {
        let compendium = Compendium::builtin();
        let sword = compendium.create_weapon_instance("espada_larga").unwrap();
        assert_eq!(sword.damage, "1d8");
        assert_eq!(sword.damage_type, DamageType::Slashing);
        assert_eq!(sword.magic_bonus, None);
    }

    #[test]
    fn text_only_traits_survive_round_trip() {
        let compendium = Compendium::builtin();
        let orc = compendium.monster("orco").unwrap();
        let json = serde_json::to_string(orc).unwrap();
        let back: MonsterEntry = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back.traits.first(),
            Some(MonsterTrait::TextOnly { tags, .. }) if !tags.is_empty()
        ));
    }

    #[test]
    fn structured_traits_parse() {
        let compendium = Compendium::builtin();
        let skeleton = compendium.monster("esqueleto").unwrap();
        assert!(skeleton.traits.iter().any(|t| matches!(
            t,
            MonsterTrait::DamageVulnerabilities { types } if types.contains(&DamageType::Bludgeoning)
        )));
        let troll = compendium.monster("troll").unwrap();
        assert!(troll
            .traits
            .iter()
            .any(|t| matches!(t, MonsterTrait::Regeneration { hit_points: 10 })));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let json = r#"{"armas": [
            {"id": "daga", "nombre": "Daga", "daño": "1d4", "tipo_daño": "perforante"},
            {"id": "daga", "nombre": "Daga", "daño": "1d4", "tipo_daño": "perforante"}
        ]}"#;
        assert!(matches!(
            InMemoryStore::from_json(json),
            Err(CompendiumError::DuplicateId(id)) if id == "daga"
        ));
    }
}
