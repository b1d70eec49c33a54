use super::KeyMapping;
use crate::changeset::{EntityRecord, RecordId};
use crate::core::Value;
use crate::metadata::EntityTypeDescriptor;
use std::collections::HashMap;

/// Temporary-to-real key pairs for the added entities of one save.
///
/// Values are copied out of the entities when recorded and finalized, so the
/// tracker stays valid after the store session is gone.
#[derive(Debug, Default)]
pub struct KeyMappingTracker {
    temp_keys: HashMap<RecordId, Value>,
    mappings: Vec<KeyMapping>,
}

impl KeyMappingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the key an added entity carries before the store sees it.
    pub fn record(&mut self, record: &EntityRecord, descriptor: &EntityTypeDescriptor) {
        let temp = first_key_value(record, descriptor);
        self.temp_keys.insert(record.id(), temp);
    }

    /// Pair the captured key with the entity's current key.
    ///
    /// Returns `None` for records that were never captured or whose key is
    /// not store-generated: the client's value was already the real one.
    pub fn finalize(
        &mut self,
        record: &EntityRecord,
        descriptor: &EntityTypeDescriptor,
    ) -> Option<KeyMapping> {
        if !descriptor.key_generation().is_store_generated() {
            return None;
        }
        let temp_value = self.temp_keys.get(&record.id())?.clone();
        let mapping = KeyMapping {
            entity_type_name: descriptor.name().to_string(),
            temp_value,
            real_value: first_key_value(record, descriptor),
        };
        self.mappings.push(mapping.clone());
        Some(mapping)
    }

    pub fn all(&self) -> &[KeyMapping] {
        &self.mappings
    }

    pub fn into_mappings(self) -> Vec<KeyMapping> {
        self.mappings
    }
}

fn first_key_value(record: &EntityRecord, descriptor: &EntityTypeDescriptor) -> Value {
    descriptor
        .key_of(&record.entity)
        .values()
        .first()
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{ChangeSet, Entity};
    use crate::core::{DataType, FieldDescriptor};
    use crate::metadata::KeyGeneration;

    fn descriptor(generation: KeyGeneration) -> EntityTypeDescriptor {
        EntityTypeDescriptor::new("TodoList")
            .field(FieldDescriptor::new("id", DataType::Integer))
            .key("id")
            .generated_by(generation)
    }

    #[test]
    fn test_generated_key_is_mapped() {
        let desc = descriptor(KeyGeneration::Identity);
        let mut cs = ChangeSet::new();
        let id = cs.add(Entity::new("TodoList").with("id", -1));

        let mut tracker = KeyMappingTracker::new();
        tracker.record(cs.record(id).unwrap(), &desc);
        cs.record_mut(id).unwrap().entity.set("id", 17);

        let mapping = tracker.finalize(cs.record(id).unwrap(), &desc).unwrap();
        assert_eq!(mapping.temp_value, Value::Integer(-1));
        assert_eq!(mapping.real_value, Value::Integer(17));
        assert_eq!(tracker.all().len(), 1);
    }

    #[test]
    fn test_client_key_is_not_mapped() {
        let desc = descriptor(KeyGeneration::None);
        let mut cs = ChangeSet::new();
        let id = cs.add(Entity::new("TodoList").with("id", 5));

        let mut tracker = KeyMappingTracker::new();
        tracker.record(cs.record(id).unwrap(), &desc);
        assert!(tracker.finalize(cs.record(id).unwrap(), &desc).is_none());
        assert!(tracker.into_mappings().is_empty());
    }
}
