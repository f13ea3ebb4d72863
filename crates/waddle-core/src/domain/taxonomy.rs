//! Entity taxonomy: the declarative catalog of entity types and their variants.
//!
//! One JSON definition record per entity type lives in the taxonomy directory:
//!
//! ```text
//! {
//!   "id": "open_duck_mini",
//!   "name": "Open Duck Mini",
//!   "variants": {
//!     "v1": { "name": "Version 1", "internal_name": "open_duck_mini_v1" },
//!     "v2": { "name": "Version 2", "internal_name": "open_duck_mini_v2" }
//!   }
//! }
//! ```
//!
//! Variant order is the key order of the record and is significant: the first
//! declared variant is the default for its type.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::error::{Result, WaddleError};

/// One variant of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDefinition {
    /// Variant id; the key of the record's `variants` map.
    #[serde(skip)]
    pub id: String,

    /// Display name (defaults to the id).
    #[serde(default)]
    pub name: String,

    /// Globally unique name the external stages expect.
    pub internal_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Any other keys of the variant record.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl VariantDefinition {
    pub fn new(id: impl Into<String>, internal_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            internal_name: internal_name.into(),
            description: String::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Definition record for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Variants in declaration order.
    #[serde(default, with = "ordered_variants")]
    pub variants: Vec<VariantDefinition>,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl EntityDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            variants: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }

    /// The first declared variant, which is the default for this type.
    pub fn first_variant(&self) -> Option<&VariantDefinition> {
        self.variants.first()
    }

    pub fn variant(&self, id: &str) -> Option<&VariantDefinition> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn variant_ids(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.id.clone()).collect()
    }

    fn fill_default_names(&mut self) {
        if self.name.is_empty() {
            self.name = self.id.clone();
        }
        for variant in &mut self.variants {
            if variant.name.is_empty() {
                variant.name = variant.id.clone();
            }
        }
    }
}

/// Flat listing row for a single variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantListing {
    pub entity_type: String,
    pub entity_name: String,
    pub variant: String,
    pub variant_name: String,
    pub internal_name: String,
}

/// Immutable, validated catalog of entity types.
///
/// Internal names are unique across the whole taxonomy and double as the
/// reverse-lookup key.
#[derive(Debug, Clone, Default)]
pub struct EntityTaxonomy {
    entities: Vec<EntityDefinition>,
    internal_index: HashMap<String, (usize, usize)>,
}

impl EntityTaxonomy {
    /// Build a taxonomy from definitions, in the given order.
    pub fn from_definitions(definitions: impl IntoIterator<Item = EntityDefinition>) -> Result<Self> {
        let mut entities: Vec<EntityDefinition> = Vec::new();
        let mut internal_index: HashMap<String, (usize, usize)> = HashMap::new();

        for mut definition in definitions {
            validate_definition(&definition)?;
            if entities.iter().any(|e| e.id == definition.id) {
                return Err(WaddleError::InvalidDefinition(format!(
                    "entity type '{}' is defined more than once",
                    definition.id
                )));
            }
            definition.fill_default_names();

            let entity_idx = entities.len();
            for (variant_idx, variant) in definition.variants.iter().enumerate() {
                if let Some(&(e, v)) = internal_index.get(&variant.internal_name) {
                    let owner: &EntityDefinition = &entities[e];
                    return Err(WaddleError::DuplicateInternalName {
                        internal_name: variant.internal_name.clone(),
                        first: format!("{}/{}", owner.id, owner.variants[v].id),
                        second: format!("{}/{}", definition.id, variant.id),
                    });
                }
                internal_index.insert(variant.internal_name.clone(), (entity_idx, variant_idx));
            }
            entities.push(definition);
        }

        Ok(Self {
            entities,
            internal_index,
        })
    }

    /// Load every `*.json` definition record in `dir`, ordered by file name.
    ///
    /// Records that cannot be parsed are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(WaddleError::MissingTaxonomyDir(dir.to_path_buf()));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            match read_definition(&path) {
                Ok(definition) => {
                    debug!(path = %path.display(), id = %definition.id, "loaded entity definition");
                    definitions.push(definition);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable entity definition");
                }
            }
        }

        Self::from_definitions(definitions)
    }

    /// Persist `definition` as `<dir>/<id>.json` and return the reloaded taxonomy.
    ///
    /// The definition is validated against the rest of the directory before
    /// anything is written; the file is replaced atomically.
    pub fn save_definition(dir: &Path, definition: &EntityDefinition) -> Result<Self> {
        validate_definition(definition)?;

        let current = Self::load_dir(dir)?;
        let mut candidate: Vec<EntityDefinition> = current
            .entities
            .into_iter()
            .filter(|e| e.id != definition.id)
            .collect();
        candidate.push(definition.clone());
        Self::from_definitions(candidate)?;

        let content = serde_json::to_string_pretty(definition)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(dir.join(format!("{}.json", definition.id)))
            .map_err(|e| e.error)?;

        Self::load_dir(dir)
    }

    pub fn entities(&self) -> &[EntityDefinition] {
        &self.entities
    }

    pub fn entity(&self, id: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn variant(&self, entity_type: &str, variant: &str) -> Option<&VariantDefinition> {
        self.entity(entity_type).and_then(|e| e.variant(variant))
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.id.clone()).collect()
    }

    /// Look up the entity and variant owning `internal_name`.
    pub fn find_by_internal_name(
        &self,
        internal_name: &str,
    ) -> Option<(&EntityDefinition, &VariantDefinition)> {
        self.internal_index.get(internal_name).map(|&(e, v)| {
            let entity = &self.entities[e];
            (entity, &entity.variants[v])
        })
    }

    /// Every variant of every entity type, in declaration order.
    pub fn all_variants(&self) -> Vec<VariantListing> {
        self.entities
            .iter()
            .flat_map(|entity| {
                entity.variants.iter().map(move |variant| VariantListing {
                    entity_type: entity.id.clone(),
                    entity_name: entity.name.clone(),
                    variant: variant.id.clone(),
                    variant_name: variant.name.clone(),
                    internal_name: variant.internal_name.clone(),
                })
            })
            .collect()
    }
}

/// One parsed and validated record; any failure skips the file.
fn read_definition(path: &Path) -> Result<EntityDefinition> {
    let bytes = fs::read(path)?;
    let definition: EntityDefinition = serde_json::from_slice(&bytes)?;
    validate_definition(&definition)?;
    Ok(definition)
}

fn validate_definition(definition: &EntityDefinition) -> Result<()> {
    if definition.id.trim().is_empty() {
        return Err(WaddleError::InvalidDefinition("entity id is empty".to_string()));
    }
    for variant in &definition.variants {
        if variant.id.trim().is_empty() {
            return Err(WaddleError::InvalidDefinition(format!(
                "entity type '{}' has a variant with an empty id",
                definition.id
            )));
        }
        if variant.internal_name.trim().is_empty() {
            return Err(WaddleError::InvalidDefinition(format!(
                "variant '{}/{}' has an empty internal_name",
                definition.id, variant.id
            )));
        }
    }
    Ok(())
}

/// (De)serializes the `variants` map while keeping the record's key order.
mod ordered_variants {
    use std::fmt;

    use serde::de::{self, MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::VariantDefinition;

    pub fn serialize<S>(variants: &[VariantDefinition], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(variants.len()))?;
        for variant in variants {
            map.serialize_entry(&variant.id, variant)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<VariantDefinition>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<VariantDefinition>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variant id to variant definition")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut variants: Vec<VariantDefinition> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, mut variant)) = access.next_entry::<String, VariantDefinition>()? {
                    if variants.iter().any(|v| v.id == id) {
                        return Err(de::Error::custom(format!("duplicate variant id '{id}'")));
                    }
                    variant.id = id;
                    variants.push(variant);
                }
                Ok(variants)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUCK_RECORD: &str = r#"{
        "id": "open_duck_mini",
        "name": "Open Duck Mini",
        "description": "Small bipedal duck",
        "variants": {
            "v3": { "name": "Version 3", "internal_name": "open_duck_mini_v3", "servos": 14 },
            "v1": { "name": "Version 1", "internal_name": "open_duck_mini_v1" },
            "v2": { "internal_name": "open_duck_mini_v2" }
        }
    }"#;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_variant_order_follows_record() {
        let def: EntityDefinition = serde_json::from_str(DUCK_RECORD).unwrap();
        assert_eq!(def.variant_ids(), vec!["v3", "v1", "v2"]);
        assert_eq!(def.first_variant().unwrap().internal_name, "open_duck_mini_v3");
        assert_eq!(def.variants[0].metadata["servos"], 14);
    }

    #[test]
    fn test_missing_variant_name_defaults_to_id() {
        let def: EntityDefinition = serde_json::from_str(DUCK_RECORD).unwrap();
        let taxonomy = EntityTaxonomy::from_definitions([def]).unwrap();
        assert_eq!(taxonomy.variant("open_duck_mini", "v2").unwrap().name, "v2");
    }

    #[test]
    fn test_serialize_keeps_variant_order() {
        let def: EntityDefinition = serde_json::from_str(DUCK_RECORD).unwrap();
        let json = serde_json::to_string(&def).unwrap();
        let v3 = json.find("\"v3\"").unwrap();
        let v1 = json.find("\"v1\"").unwrap();
        assert!(v3 < v1);
    }

    #[test]
    fn test_duplicate_internal_name_rejected() {
        let a = EntityDefinition::new("a", "A").with_variant(VariantDefinition::new("v1", "shared"));
        let b = EntityDefinition::new("b", "B").with_variant(VariantDefinition::new("v1", "shared"));
        let err = EntityTaxonomy::from_definitions([a, b]).unwrap_err();
        assert!(matches!(err, WaddleError::DuplicateInternalName { .. }));
    }

    #[test]
    fn test_load_dir_skips_bad_records_and_sorts_by_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "open_duck_mini.json", DUCK_RECORD);
        write(
            dir.path(),
            "bdx.json",
            r#"{"id": "bdx", "name": "BDX", "variants": {"v1": {"internal_name": "bdx"}}}"#,
        );
        write(dir.path(), "broken.json", "{ not json");
        write(dir.path(), "notes.txt", "ignored");

        let taxonomy = EntityTaxonomy::load_dir(dir.path()).unwrap();
        assert_eq!(taxonomy.entity_ids(), vec!["bdx", "open_duck_mini"]);
        assert_eq!(taxonomy.all_variants().len(), 4);

        let (entity, variant) = taxonomy.find_by_internal_name("open_duck_mini_v1").unwrap();
        assert_eq!(entity.id, "open_duck_mini");
        assert_eq!(variant.id, "v1");
    }

    #[test]
    fn test_load_dir_skips_non_utf8_and_empty_id_records() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "open_duck_mini.json", DUCK_RECORD);
        fs::write(dir.path().join("binary.json"), [0xff, 0xfe, 0x7b, 0x00]).unwrap();
        write(
            dir.path(),
            "anonymous.json",
            r#"{"id": "", "name": "Nobody", "variants": {"v1": {"internal_name": "nobody"}}}"#,
        );

        let taxonomy = EntityTaxonomy::load_dir(dir.path()).unwrap();
        assert_eq!(taxonomy.entity_ids(), vec!["open_duck_mini"]);
        assert!(taxonomy.find_by_internal_name("nobody").is_none());
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = EntityTaxonomy::load_dir(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, WaddleError::MissingTaxonomyDir(_)));
    }

    #[test]
    fn test_save_definition_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "open_duck_mini.json", DUCK_RECORD);

        let bdx = EntityDefinition::new("bdx", "BDX")
            .with_variant(VariantDefinition::new("v1", "bdx").with_name("Disney BDX"));
        let reloaded = EntityTaxonomy::save_definition(dir.path(), &bdx).unwrap();

        assert!(dir.path().join("bdx.json").exists());
        assert_eq!(reloaded.variant("bdx", "v1").unwrap().name, "Disney BDX");
        assert!(reloaded.entity("open_duck_mini").is_some());
    }

    #[test]
    fn test_save_definition_rejects_clash_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "open_duck_mini.json", DUCK_RECORD);

        let clash = EntityDefinition::new("clone", "Clone")
            .with_variant(VariantDefinition::new("v1", "open_duck_mini_v1"));
        let err = EntityTaxonomy::save_definition(dir.path(), &clash).unwrap_err();

        assert!(matches!(err, WaddleError::DuplicateInternalName { .. }));
        assert!(!dir.path().join("clone.json").exists());
    }
}
