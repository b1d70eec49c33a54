use crate::core::{EntityKey, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static NULL: Value = Value::Null;

/// Association wired by relationship fixup.
///
/// Links are logical: they name the target by type and key instead of
/// pointing at it, so a wired change-set never contains a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityLink {
    /// Foreign-key field the link populates
    pub field: String,
    pub target_type: String,
    /// Key the target carries in the change-set (possibly temporary)
    pub target_key: EntityKey,
    /// `true` when the target is another record of the same change-set
    pub in_change_set: bool,
}

/// Store-shaped entity instance: a type name plus named field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    entity_type: String,
    #[serde(default)]
    fields: Row,
    #[serde(skip)]
    links: BTreeMap<String, EntityLink>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: Row::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn from_row(entity_type: impl Into<String>, fields: Row) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields,
            links: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.entity_type
    }

    /// Field value, `Null` when the field is absent.
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    pub fn into_row(self) -> Row {
        self.fields
    }

    // ==================== Navigation wiring ====================

    pub fn links(&self) -> &BTreeMap<String, EntityLink> {
        &self.links
    }

    pub fn link(&self, navigation: &str) -> Option<&EntityLink> {
        self.links.get(navigation)
    }

    pub fn set_link(&mut self, navigation: impl Into<String>, link: EntityLink) {
        self.links.insert(navigation.into(), link);
    }

    pub fn clear_links(&mut self) {
        self.links.clear();
    }

    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }
}
