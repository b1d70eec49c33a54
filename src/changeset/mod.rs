// ============================================================================
// Change-set Data Model
// ============================================================================
//
// A change-set owns every record submitted for one save. Records are kept in
// an arena and addressed by `RecordId`; type buckets only hold ids, in the
// order the caller supplied them.
//
// ============================================================================

pub mod entity;
pub mod record;

pub use entity::{Entity, EntityLink};
pub use record::{EntityRecord, EntityState, RecordId};

use crate::core::Row;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ChangeSetPayload")]
pub struct ChangeSet {
    id: Uuid,
    tag: Option<serde_json::Value>,
    records: Vec<EntityRecord>,
    buckets: Vec<(String, Vec<RecordId>)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            tag: None,
            records: Vec::new(),
            buckets: Vec::new(),
        }
    }

    /// Attach an opaque caller tag, visible to save interceptors.
    pub fn with_tag(mut self, tag: serde_json::Value) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tag(&self) -> Option<&serde_json::Value> {
        self.tag.as_ref()
    }

    pub fn push(&mut self, mut record: EntityRecord) -> RecordId {
        let id = RecordId(self.records.len());
        record.id = id;

        let type_name = record.type_name().to_string();
        match self.buckets.iter_mut().find(|(name, _)| *name == type_name) {
            Some((_, ids)) => ids.push(id),
            None => self.buckets.push((type_name, vec![id])),
        }

        self.records.push(record);
        id
    }

    pub fn add(&mut self, entity: Entity) -> RecordId {
        self.push(EntityRecord::new(entity, EntityState::Added))
    }

    pub fn modify(&mut self, entity: Entity) -> RecordId {
        self.push(EntityRecord::new(entity, EntityState::Modified))
    }

    pub fn delete(&mut self, entity: Entity) -> RecordId {
        self.push(EntityRecord::new(entity, EntityState::Deleted))
    }

    pub fn unchanged(&mut self, entity: Entity) -> RecordId {
        self.push(EntityRecord::new(entity, EntityState::Unchanged))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, id: RecordId) -> Option<&EntityRecord> {
        self.records.get(id.0)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut EntityRecord> {
        self.records.get_mut(id.0)
    }

    pub fn records(&self) -> &[EntityRecord] {
        &self.records
    }

    /// Type names in the order their first record was supplied.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|(name, _)| name.as_str())
    }

    /// Record ids in type-then-list order.
    pub fn ordered_ids(&self) -> Vec<RecordId> {
        self.buckets
            .iter()
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Keep only the records `keep` accepts, re-numbering the survivors.
    ///
    /// Ids handed out before the call are invalidated; only use this before
    /// the save pipeline starts wiring records to each other.
    pub fn retain(self, mut keep: impl FnMut(&EntityRecord) -> bool) -> Self {
        let ordered = self.ordered_ids();
        let mut records: Vec<Option<EntityRecord>> = self.records.into_iter().map(Some).collect();
        let mut kept = ChangeSet {
            id: self.id,
            tag: self.tag,
            records: Vec::new(),
            buckets: Vec::new(),
        };

        for id in ordered {
            if let Some(record) = records[id.0].take() {
                if keep(&record) {
                    kept.push(record);
                }
            }
        }
        kept
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Wire form ====================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeSetPayload {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    tag: Option<serde_json::Value>,
    entities: Vec<RecordPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordPayload {
    entity_type: String,
    state: EntityState,
    #[serde(default)]
    fields: Row,
    #[serde(default)]
    original_values: Row,
}

impl From<ChangeSetPayload> for ChangeSet {
    fn from(payload: ChangeSetPayload) -> Self {
        let mut change_set = ChangeSet::with_id(payload.id.unwrap_or_else(Uuid::new_v4));
        change_set.tag = payload.tag;

        for entry in payload.entities {
            let mut record = EntityRecord::new(
                Entity::from_row(entry.entity_type, entry.fields),
                entry.state,
            );
            record.original_values = entry.original_values;
            change_set.push(record);
        }
        change_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[test]
    fn test_type_then_list_order() {
        let mut cs = ChangeSet::new();
        let item = cs.add(Entity::new("TodoItem").with("id", -5));
        let list = cs.add(Entity::new("TodoList").with("id", -1));
        let item2 = cs.add(Entity::new("TodoItem").with("id", -6));

        assert_eq!(cs.ordered_ids(), vec![item, item2, list]);
        assert_eq!(cs.type_names().collect::<Vec<_>>(), vec!["TodoItem", "TodoList"]);
        assert_eq!(cs.len(), 3);
    }

    #[test]
    fn test_retain_renumbers() {
        let mut cs = ChangeSet::new();
        cs.add(Entity::new("A").with("id", 1));
        cs.add(Entity::new("A").with("id", 2));
        cs.add(Entity::new("B").with("id", 3));
        let id = cs.id();

        let kept = cs.retain(|r| r.entity.get("id") != &Value::Integer(2));
        assert_eq!(kept.id(), id);
        assert_eq!(kept.len(), 2);
        for (index, record) in kept.records().iter().enumerate() {
            assert_eq!(record.id().index(), index);
        }
        assert_eq!(kept.record(RecordId(1)).unwrap().type_name(), "B");
    }

    #[test]
    fn test_deserialize_payload() {
        let json = serde_json::json!({
            "id": "6f2c1d1e-8a4b-4c1e-9d53-0d6a4f1b2c3d",
            "entities": [
                {"entityType": "TodoList", "state": "Added", "fields": {"id": -1, "title": "Home"}},
                {"entityType": "Customer", "state": "Modified",
                 "fields": {"id": 42, "version": 4}, "originalValues": {"version": 3}}
            ]
        });
        let cs: ChangeSet = serde_json::from_value(json).unwrap();

        assert_eq!(cs.id().to_string(), "6f2c1d1e-8a4b-4c1e-9d53-0d6a4f1b2c3d");
        assert_eq!(cs.len(), 2);
        let customer = cs.record(RecordId(1)).unwrap();
        assert_eq!(customer.state, EntityState::Modified);
        assert_eq!(customer.original("version"), Some(&Value::Integer(3)));
    }
}
