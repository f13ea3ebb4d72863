//! Public (entity type, variant) pair to internal name, and back.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{EntityDefinition, EntityTaxonomy, Result, VariantDefinition, WaddleError};

/// A request pair after resolution against the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEntity {
    pub entity_type: String,
    pub variant: String,
    pub internal_name: String,
}

/// Pure lookups over an immutable taxonomy.
///
/// Cloning is cheap; every clone shares the same taxonomy.
#[derive(Debug, Clone)]
pub struct NameResolver {
    taxonomy: Arc<EntityTaxonomy>,
}

impl NameResolver {
    pub fn new(taxonomy: Arc<EntityTaxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &EntityTaxonomy {
        &self.taxonomy
    }

    /// Resolve a pair; without a variant the first declared one is used.
    pub fn resolve(&self, entity_type: &str, variant: Option<&str>) -> Result<ResolvedEntity> {
        let entity = self.entity(entity_type)?;
        let found = match variant {
            Some(id) => entity.variant(id).ok_or_else(|| WaddleError::UnknownVariant {
                entity_type: entity.id.clone(),
                variant: id.to_string(),
                valid: entity.variant_ids(),
            })?,
            None => entity
                .first_variant()
                .ok_or_else(|| WaddleError::NoVariants(entity.id.clone()))?,
        };
        Ok(resolved(entity, found))
    }

    pub fn resolve_internal_name(&self, entity_type: &str, variant: Option<&str>) -> Result<String> {
        self.resolve(entity_type, variant).map(|r| r.internal_name)
    }

    pub fn reverse_resolve(&self, internal_name: &str) -> Result<ResolvedEntity> {
        self.taxonomy
            .find_by_internal_name(internal_name)
            .map(|(entity, variant)| resolved(entity, variant))
            .ok_or_else(|| WaddleError::UnknownInternalName(internal_name.to_string()))
    }

    /// Full entity and variant records for an internal name.
    pub fn config_by_internal_name(
        &self,
        internal_name: &str,
    ) -> Result<(&EntityDefinition, &VariantDefinition)> {
        self.taxonomy
            .find_by_internal_name(internal_name)
            .ok_or_else(|| WaddleError::UnknownInternalName(internal_name.to_string()))
    }

    pub fn list_types(&self) -> Vec<String> {
        self.taxonomy.entity_ids()
    }

    pub fn list_variants(&self, entity_type: &str) -> Result<Vec<String>> {
        self.entity(entity_type).map(EntityDefinition::variant_ids)
    }

    fn entity(&self, entity_type: &str) -> Result<&EntityDefinition> {
        self.taxonomy
            .entity(entity_type)
            .ok_or_else(|| WaddleError::UnknownEntityType {
                entity_type: entity_type.to_string(),
                valid: self.taxonomy.entity_ids(),
            })
    }
}

fn resolved(entity: &EntityDefinition, variant: &VariantDefinition) -> ResolvedEntity {
    ResolvedEntity {
        entity_type: entity.id.clone(),
        variant: variant.id.clone(),
        internal_name: variant.internal_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> NameResolver {
        let duck = EntityDefinition::new("open_duck_mini", "Open Duck Mini")
            .with_variant(VariantDefinition::new("v1", "open_duck_mini_v1"))
            .with_variant(VariantDefinition::new("v2", "open_duck_mini_v2"))
            .with_variant(VariantDefinition::new("v3", "open_duck_mini_v3"));
        let empty = EntityDefinition::new("empty", "Empty");
        let taxonomy = EntityTaxonomy::from_definitions([duck, empty]).unwrap();
        NameResolver::new(Arc::new(taxonomy))
    }

    #[test]
    fn test_resolve_explicit_variant() {
        let r = resolver();
        assert_eq!(
            r.resolve_internal_name("open_duck_mini", Some("v2")).unwrap(),
            "open_duck_mini_v2"
        );
    }

    #[test]
    fn test_resolve_defaults_to_first_declared_variant() {
        let r = resolver();
        for _ in 0..3 {
            assert_eq!(
                r.resolve_internal_name("open_duck_mini", None).unwrap(),
                "open_duck_mini_v1"
            );
        }
    }

    #[test]
    fn test_reverse_inverts_resolve_for_every_pair() {
        let r = resolver();
        for entity_type in r.list_types() {
            for variant in r.list_variants(&entity_type).unwrap() {
                let resolved = r.resolve(&entity_type, Some(&variant)).unwrap();
                let back = r.reverse_resolve(&resolved.internal_name).unwrap();
                assert_eq!((back.entity_type, back.variant), (entity_type.clone(), variant));
            }
        }
    }

    #[test]
    fn test_unknown_type_lists_valid_types() {
        let err = resolver().resolve("goose", None).unwrap_err();
        assert!(err.is_resolution_failure());
        assert!(err.to_string().contains("open_duck_mini"));
    }

    #[test]
    fn test_unknown_variant_lists_valid_variants() {
        let err = resolver().resolve("open_duck_mini", Some("v9")).unwrap_err();
        assert!(err.to_string().contains("v1, v2, v3"));
    }

    #[test]
    fn test_type_without_variants() {
        let err = resolver().resolve("empty", None).unwrap_err();
        assert!(matches!(err, WaddleError::NoVariants(_)));
    }

    #[test]
    fn test_config_by_internal_name() {
        let r = resolver();
        let (entity, variant) = r.config_by_internal_name("open_duck_mini_v3").unwrap();
        assert_eq!(entity.name, "Open Duck Mini");
        assert_eq!(variant.id, "v3");
        assert!(r.config_by_internal_name("nope").is_err());
    }
}
