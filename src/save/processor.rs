use super::concurrency::restore_version;
use super::KeyMappingTracker;
use crate::changeset::{EntityRecord, EntityState};
use crate::core::Result;
use crate::metadata::EntityTypeDescriptor;
use crate::storage::{StageId, StoreSession};

/// Stage the store operation matching the record's state.
///
/// Added and Modified records get their original version back first; added
/// records also have their temporary key captured before the store can
/// replace it.
pub fn apply<S: StoreSession + ?Sized>(
    session: &mut S,
    record: &mut EntityRecord,
    descriptor: &EntityTypeDescriptor,
    tracker: &mut KeyMappingTracker,
) -> Result<StageId> {
    match record.state {
        EntityState::Added => {
            restore_version(record, descriptor)?;
            tracker.record(record, descriptor);
            session.create(&record.entity)
        }
        EntityState::Modified => {
            restore_version(record, descriptor)?;
            session.update(&record.entity)
        }
        EntityState::Deleted => session.delete(&record.entity),
        // Unchanged records are only pinned so concurrent writers conflict
        EntityState::Unchanged => session.lock(&record.entity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{ChangeSet, Entity};
    use crate::core::{DataType, FieldDescriptor, Value};
    use crate::metadata::{KeyGeneration, Metadata};
    use crate::storage::InMemoryStore;
    use crate::transaction::TransactionSettings;

    fn store() -> InMemoryStore {
        let metadata = Metadata::new()
            .with_type(
                EntityTypeDescriptor::new("Customer")
                    .field(FieldDescriptor::new("id", DataType::Integer))
                    .field(FieldDescriptor::new("name", DataType::Text))
                    .field(FieldDescriptor::new("version", DataType::Integer))
                    .key("id")
                    .generated_by(KeyGeneration::Identity)
                    .version("version"),
            )
            .unwrap();
        InMemoryStore::new(metadata).unwrap()
    }

    #[test]
    fn test_dispatch_by_state() {
        let store = store();
        store
            .seed(Entity::new("Customer").with("id", 42).with("name", "Ada"))
            .unwrap();
        let desc = store.metadata().get("Customer").unwrap().clone();

        let mut cs = ChangeSet::new();
        let added = cs.add(Entity::new("Customer").with("id", -1).with("name", "Bob"));
        let modified = cs.push(
            EntityRecord::new(
                Entity::new("Customer")
                    .with("id", 42)
                    .with("name", "Ada L.")
                    .with("version", 2),
                EntityState::Modified,
            )
            .with_original("version", 1),
        );

        let mut session = store.session();
        session.begin(&TransactionSettings::default()).unwrap();
        let mut tracker = KeyMappingTracker::new();

        let added_stage =
            apply(&mut session, cs.record_mut(added).unwrap(), &desc, &mut tracker).unwrap();
        let modified_stage =
            apply(&mut session, cs.record_mut(modified).unwrap(), &desc, &mut tracker).unwrap();
        assert_eq!(
            cs.record(modified).unwrap().entity.get("version"),
            &Value::Integer(1)
        );

        assert!(session.flush().unwrap().is_empty());
        let created = session.refresh(added_stage).unwrap().unwrap();
        assert_eq!(created.get("id"), &Value::Integer(43));
        let updated = session.refresh(modified_stage).unwrap().unwrap();
        assert_eq!(updated.get("version"), &Value::Integer(2));
        session.rollback().unwrap();
    }
}
