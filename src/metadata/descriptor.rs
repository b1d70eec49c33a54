use crate::changeset::Entity;
use crate::core::{DbError, EntityKey, FieldDescriptor, Result};
use serde::{Deserialize, Serialize};

/// How the identifier of a new entity is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyGeneration {
    /// Client supplies the real key
    #[default]
    None,
    /// Store assigns the next value of a per-type sequence at insert
    Identity,
    /// Store asks its configured `KeyGenerator` for a key at insert
    KeyGenerator,
}

impl KeyGeneration {
    pub fn is_store_generated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A single-field foreign key and the navigation that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    /// Logical name of the association, e.g. `list`
    pub navigation: String,
    /// Field holding the key value, e.g. `list_id`
    pub field: String,
    pub target_type: String,
}

/// Read-only shape of one entity type.
///
/// The save pipeline never inspects entity fields by convention; every
/// identifier, foreign-key and version access goes through this table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTypeDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
    key_fields: Vec<String>,
    key_generation: KeyGeneration,
    foreign_keys: Vec<ForeignKeyDescriptor>,
    version_field: Option<String>,
}

impl EntityTypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            key_fields: Vec::new(),
            key_generation: KeyGeneration::None,
            foreign_keys: Vec::new(),
            version_field: None,
        }
    }

    // ==================== Builder ====================

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare a key field. Call once per component of a composite key.
    pub fn key(mut self, field: impl Into<String>) -> Self {
        self.key_fields.push(field.into());
        self
    }

    pub fn generated_by(mut self, generation: KeyGeneration) -> Self {
        self.key_generation = generation;
        self
    }

    pub fn foreign_key(
        mut self,
        navigation: impl Into<String>,
        field: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKeyDescriptor {
            navigation: navigation.into(),
            field: field.into(),
            target_type: target_type.into(),
        });
        self
    }

    pub fn version(mut self, field: impl Into<String>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    // ==================== Accessors ====================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.key_fields.iter().any(|k| k == name)
    }

    pub fn key_generation(&self) -> KeyGeneration {
        self.key_generation
    }

    pub fn foreign_keys(&self) -> &[ForeignKeyDescriptor] {
        &self.foreign_keys
    }

    pub fn version_field(&self) -> Option<&FieldDescriptor> {
        self.version_field.as_deref().and_then(|name| self.get_field(name))
    }

    // ==================== Capabilities ====================

    pub fn key_of(&self, entity: &Entity) -> EntityKey {
        EntityKey::new(
            self.key_fields
                .iter()
                .map(|name| entity.get(name).clone())
                .collect(),
        )
    }

    pub fn set_key(&self, entity: &mut Entity, key: &EntityKey) -> Result<()> {
        if key.values().len() != self.key_fields.len() {
            return Err(DbError::Execution(format!(
                "Key {} has {} components, entity type '{}' expects {}",
                key,
                key.values().len(),
                self.name,
                self.key_fields.len()
            )));
        }
        for (name, value) in self.key_fields.iter().zip(key.values()) {
            entity.set(name.clone(), value.clone());
        }
        Ok(())
    }

    /// Check that the descriptor itself is coherent.
    pub fn validate(&self) -> Result<()> {
        if self.key_fields.is_empty() {
            return Err(DbError::Execution(format!(
                "Entity type '{}' declares no key fields",
                self.name
            )));
        }
        for key in &self.key_fields {
            self.require_field(key)?;
        }

        if self.key_generation.is_store_generated() && self.key_fields.len() != 1 {
            return Err(DbError::Execution(format!(
                "Entity type '{}' uses {:?} keys but has a composite key",
                self.name, self.key_generation
            )));
        }
        if self.key_generation == KeyGeneration::Identity {
            let key = self.require_field(&self.key_fields[0])?;
            if !key.data_type.is_integer() {
                return Err(DbError::Execution(format!(
                    "Identity key '{}.{}' must be an integer, found {}",
                    self.name, key.name, key.data_type
                )));
            }
        }

        if let Some(version) = &self.version_field {
            let field = self.require_field(version)?;
            if !field.data_type.is_integer() {
                return Err(DbError::Execution(format!(
                    "Version field '{}.{}' must be an integer, found {}",
                    self.name, version, field.data_type
                )));
            }
        }

        for (i, fk) in self.foreign_keys.iter().enumerate() {
            self.require_field(&fk.field)?;
            if self.foreign_keys[..i].iter().any(|other| other.navigation == fk.navigation) {
                return Err(DbError::Execution(format!(
                    "Entity type '{}' declares navigation '{}' twice",
                    self.name, fk.navigation
                )));
            }
        }

        Ok(())
    }

    /// Check an entity's field values against this descriptor.
    ///
    /// When `creating`, a store-generated key may still hold its temporary
    /// value and an absent version is allowed; the store assigns both.
    pub fn validate_entity(&self, entity: &Entity, creating: bool) -> Result<()> {
        if entity.type_name() != self.name {
            return Err(DbError::Execution(format!(
                "Entity of type '{}' validated against descriptor '{}'",
                entity.type_name(),
                self.name
            )));
        }

        for name in entity.fields().keys() {
            if self.get_field(name).is_none() {
                return Err(DbError::Validation {
                    entity_type: self.name.clone(),
                    property: name.clone(),
                    message: "is not a field of this entity type".to_string(),
                });
            }
        }

        for field in &self.fields {
            let value = entity.get(&field.name);
            let is_key = self.is_key_field(&field.name);

            if creating && is_key && self.key_generation.is_store_generated() {
                continue;
            }
            if creating && value.is_null() && self.version_field.as_deref() == Some(field.name.as_str()) {
                continue;
            }
            if is_key && value.is_null() {
                return Err(DbError::Validation {
                    entity_type: self.name.clone(),
                    property: field.name.clone(),
                    message: "key value is required".to_string(),
                });
            }

            field.validate(&self.name, value)?;
        }

        Ok(())
    }

    fn require_field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.get_field(name)
            .ok_or_else(|| DbError::FieldNotFound(name.to_string(), self.name.clone()))
    }
}
