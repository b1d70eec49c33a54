use super::{EntityError, KeyMapping};
use crate::changeset::{ChangeSet, EntityRecord};

/// Application hooks around a save.
///
/// Every method has a pass-through default, so implementors only override
/// what they need.
pub trait SaveInterceptor {
    /// Return `false` to drop the record from the save without an error.
    fn before_save_entity(&self, _record: &EntityRecord) -> bool {
        true
    }

    /// Veto the whole change-set. Returned errors become the save result
    /// and nothing is written.
    fn before_save_entities(&self, _change_set: &ChangeSet) -> Result<(), Vec<EntityError>> {
        Ok(())
    }

    /// Called once the save has committed.
    fn after_save_entities(&self, _change_set: &ChangeSet, _key_mappings: &[KeyMapping]) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl SaveInterceptor for NoopInterceptor {}

impl<T: SaveInterceptor + ?Sized> SaveInterceptor for &T {
    fn before_save_entity(&self, record: &EntityRecord) -> bool {
        (**self).before_save_entity(record)
    }

    fn before_save_entities(&self, change_set: &ChangeSet) -> Result<(), Vec<EntityError>> {
        (**self).before_save_entities(change_set)
    }

    fn after_save_entities(&self, change_set: &ChangeSet, key_mappings: &[KeyMapping]) {
        (**self).after_save_entities(change_set, key_mappings)
    }
}
