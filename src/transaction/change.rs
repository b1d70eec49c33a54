// ============================================================================
// Staged Changes
// ============================================================================
//
// Command Pattern for the store's unit of work: every create/update/delete/
// lock call records a `Change`, and flush executes the recorded commands in
// dependency order.
//
// ============================================================================

use crate::changeset::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Lock,
}

/// A single staged operation on one entity
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub entity: Entity,
}

impl Change {
    pub fn new(kind: ChangeKind, entity: Entity) -> Self {
        Self { kind, entity }
    }

    /// Get the entity type affected by this change
    pub fn type_name(&self) -> &str {
        self.entity.type_name()
    }

    /// Check if this change writes a row
    pub fn is_write(&self) -> bool {
        !matches!(self.kind, ChangeKind::Lock)
    }

    /// Check if the staged entity still exists after this change
    pub fn keeps_row(&self) -> bool {
        !matches!(self.kind, ChangeKind::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_name() {
        let change = Change::new(ChangeKind::Insert, Entity::new("users"));
        assert_eq!(change.type_name(), "users");
    }

    #[test]
    fn test_change_classification() {
        let lock = Change::new(ChangeKind::Lock, Entity::new("users"));
        assert!(!lock.is_write());
        assert!(lock.keeps_row());

        let delete = Change::new(ChangeKind::Delete, Entity::new("users"));
        assert!(delete.is_write());
        assert!(!delete.keeps_row());
    }
}
