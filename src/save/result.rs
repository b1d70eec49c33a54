use crate::changeset::{Entity, EntityRecord};
use crate::core::{DbError, EntityErrorKind, Value};
use crate::metadata::EntityTypeDescriptor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Temporary key of an added entity paired with the key the store assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping {
    pub entity_type_name: String,
    pub temp_value: Value,
    pub real_value: Value,
}

/// Per-entity failure, shaped for direct rendering to an API caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityError {
    pub error_name: EntityErrorKind,
    pub entity_type_name: String,
    /// Best-effort key; temporary for entities that were never persisted
    pub key_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    pub error_message: String,
}

impl EntityError {
    pub fn new(
        kind: EntityErrorKind,
        entity_type_name: impl Into<String>,
        key_values: Vec<Value>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_name: kind,
            entity_type_name: entity_type_name.into(),
            key_values,
            property_name: None,
            error_message: message.into(),
        }
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property_name = Some(property.into());
        self
    }

    /// Entity error for `record`, or `None` if `error` is not recoverable.
    pub fn from_db_error(
        record: &EntityRecord,
        descriptor: &EntityTypeDescriptor,
        error: &DbError,
    ) -> Option<Self> {
        let kind = error.entity_error_kind()?;
        let key = descriptor.key_of(&record.entity);
        let entity_error = Self::new(
            kind,
            record.type_name(),
            key.values().to_vec(),
            error.to_string(),
        );
        Some(match error.property_name() {
            Some(property) => entity_error.with_property(property),
            None => entity_error,
        })
    }
}

/// Outcome of one save.
///
/// Exactly one of `errors` and the success payload (`entities`,
/// `key_mappings`) is populated: any error means nothing was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    pub change_set_id: Uuid,
    pub entities: Vec<Entity>,
    pub key_mappings: Vec<KeyMapping>,
    pub errors: Vec<EntityError>,
}

impl SaveResult {
    pub fn failed(change_set_id: Uuid, errors: Vec<EntityError>) -> Self {
        Self {
            change_set_id,
            entities: Vec::new(),
            key_mappings: Vec::new(),
            errors,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn key_mapping(&self, entity_type: &str, temp_value: &Value) -> Option<&KeyMapping> {
        self.key_mappings
            .iter()
            .find(|m| m.entity_type_name == entity_type && m.temp_value.key_eq(temp_value))
    }
}
