use super::{EntityTypeDescriptor, ForeignKeyDescriptor};
use crate::core::{DbError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Catalog of entity-type descriptors.
///
/// Immutable once built, so a store can hand the same catalog to every
/// session by cloning the `Arc`. Registering a type produces a new catalog
/// (copy-on-write); existing clones are unaffected.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    types: Arc<HashMap<String, EntityTypeDescriptor>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type - returns a NEW catalog
    pub fn with_type(self, descriptor: EntityTypeDescriptor) -> Result<Self> {
        descriptor.validate()?;

        let name = descriptor.name().to_string();
        if self.types.contains_key(&name) {
            return Err(DbError::Execution(format!(
                "Entity type '{}' is already registered",
                name
            )));
        }

        let mut types = (*self.types).clone();
        types.insert(name, descriptor);

        Ok(Self {
            types: Arc::new(types),
        })
    }

    pub fn get(&self, name: &str) -> Result<&EntityTypeDescriptor> {
        self.types
            .get(name)
            .ok_or_else(|| DbError::EntityTypeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Every foreign key, on any type, that points at `target_type`.
    pub fn referencing(&self, target_type: &str) -> Vec<(&EntityTypeDescriptor, &ForeignKeyDescriptor)> {
        let mut refs: Vec<_> = self
            .types
            .values()
            .flat_map(|desc| {
                desc.foreign_keys()
                    .iter()
                    .filter(|fk| fk.target_type == target_type)
                    .map(move |fk| (desc, fk))
            })
            .collect();
        refs.sort_by(|a, b| (a.0.name(), &a.1.field).cmp(&(b.0.name(), &b.1.field)));
        refs
    }

    /// Check that every foreign key targets a registered type with a single-field key.
    pub fn validate(&self) -> Result<()> {
        for desc in self.types.values() {
            for fk in desc.foreign_keys() {
                let target = self.get(&fk.target_type)?;
                if target.key_fields().len() != 1 {
                    return Err(DbError::Execution(format!(
                        "Foreign key {}.{} targets '{}', which has a composite key",
                        desc.name(),
                        fk.field,
                        target.name()
                    )));
                }
            }
        }
        Ok(())
    }
}
