use super::Entity;
use crate::core::{Row, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Added => write!(f, "Added"),
            EntityState::Modified => write!(f, "Modified"),
            EntityState::Deleted => write!(f, "Deleted"),
            EntityState::Unchanged => write!(f, "Unchanged"),
        }
    }
}

/// Position of a record inside its change-set.
///
/// This is the record's identity for the duration of one save; two records
/// with equal field values are still different records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) usize);

impl RecordId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub(crate) id: RecordId,
    pub entity: Entity,
    pub state: EntityState,
    /// Pre-edit values, consulted for version fields and for foreign keys of
    /// deleted entities
    pub original_values: Row,
}

impl EntityRecord {
    pub fn new(entity: Entity, state: EntityState) -> Self {
        Self {
            id: RecordId(0),
            entity,
            state,
            original_values: Row::new(),
        }
    }

    pub fn with_original(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.original_values.insert(field.into(), value.into());
        self
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        self.entity.type_name()
    }

    pub fn original(&self, field: &str) -> Option<&Value> {
        self.original_values.get(field)
    }
}
