use super::EntityError;
use crate::changeset::{ChangeSet, EntityLink, EntityRecord, EntityState, RecordId};
use crate::core::{DbError, EntityErrorKind, EntityKey, Result, Value};
use crate::metadata::{EntityTypeDescriptor, ForeignKeyDescriptor, Metadata};
use crate::storage::StoreSession;
use std::collections::HashSet;
use tracing::debug;

/// Wires foreign-key values to the records or stored rows they name.
///
/// The first pass runs before any store operation and links records to other
/// records of the same change-set. The second runs after the records were
/// staged and resolves what is left against the store. Links never outlive
/// the save: `remove_relationships` clears them before entities are returned.
pub struct RelationshipFixer<'m> {
    metadata: &'m Metadata,
}

struct Candidate {
    id: RecordId,
    type_name: String,
    key: EntityKey,
    state: EntityState,
}

impl<'m> RelationshipFixer<'m> {
    pub fn new(metadata: &'m Metadata) -> Self {
        Self { metadata }
    }

    /// Link records to targets inside the change-set.
    ///
    /// A record that is not itself deleted and still points at a deleted
    /// record is reported as an unresolved reference.
    pub fn fix_in_set(&self, change_set: &mut ChangeSet) -> Result<Vec<EntityError>> {
        let candidates = self.candidates(change_set)?;
        let mut links = Vec::new();
        let mut errors = Vec::new();

        for id in change_set.ordered_ids() {
            let Some(record) = change_set.record(id) else {
                continue;
            };
            let desc = self.metadata.get(record.type_name())?;

            for fk in desc.foreign_keys() {
                let value = reference_value(record, fk);
                if value.is_null() {
                    continue;
                }
                let wanted = EntityKey::single(value);
                let Some(target) = candidates.iter().find(|c| {
                    c.id != id && c.type_name == fk.target_type && c.key.key_eq(&wanted)
                }) else {
                    continue;
                };

                if target.state == EntityState::Deleted && record.state != EntityState::Deleted {
                    errors.push(unresolved(record, desc, fk, &wanted));
                    continue;
                }

                links.push((
                    id,
                    fk.navigation.clone(),
                    EntityLink {
                        field: fk.field.clone(),
                        target_type: fk.target_type.clone(),
                        target_key: target.key.clone(),
                        in_change_set: true,
                    },
                ));
            }
        }

        debug!(links = links.len(), errors = errors.len(), "in-set fixup");
        for (id, navigation, link) in links {
            if let Some(record) = change_set.record_mut(id) {
                record.entity.set_link(navigation, link);
            }
        }
        Ok(errors)
    }

    /// Resolve the remaining references against the store.
    ///
    /// Deleted records are skipped; the store's delete checks cover them.
    /// So are the `failed` records, which already carry an error.
    pub fn fix_persisted<S: StoreSession + ?Sized>(
        &self,
        change_set: &mut ChangeSet,
        session: &mut S,
        failed: &HashSet<RecordId>,
    ) -> Result<Vec<EntityError>> {
        let mut errors = Vec::new();
        let mut loaded = 0usize;

        for id in change_set.ordered_ids() {
            if failed.contains(&id) {
                continue;
            }
            let Some(record) = change_set.record_mut(id) else {
                continue;
            };
            if record.state == EntityState::Deleted {
                continue;
            }
            let desc = self.metadata.get(record.type_name())?;

            for fk in desc.foreign_keys() {
                if record.entity.link(&fk.navigation).is_some() {
                    continue;
                }
                let value = record.entity.get(&fk.field).clone();
                if value.is_null() {
                    continue;
                }
                let key = EntityKey::single(value);

                if session.load_reference(&fk.target_type, &key)? {
                    loaded += 1;
                    record.entity.set_link(
                        fk.navigation.clone(),
                        EntityLink {
                            field: fk.field.clone(),
                            target_type: fk.target_type.clone(),
                            target_key: key,
                            in_change_set: false,
                        },
                    );
                } else {
                    errors.push(unresolved(record, desc, fk, &key));
                }
            }
        }

        debug!(loaded, errors = errors.len(), "persisted fixup");
        Ok(errors)
    }

    pub fn remove_relationships(&self, change_set: &mut ChangeSet) {
        for id in change_set.ordered_ids() {
            if let Some(record) = change_set.record_mut(id) {
                record.entity.clear_links();
            }
        }
    }

    fn candidates(&self, change_set: &ChangeSet) -> Result<Vec<Candidate>> {
        change_set
            .records()
            .iter()
            .map(|record| {
                let desc = self.metadata.get(record.type_name())?;
                Ok(Candidate {
                    id: record.id(),
                    type_name: record.type_name().to_string(),
                    key: desc.key_of(&record.entity),
                    state: record.state,
                })
            })
            .collect()
    }
}

/// Foreign-key value used for fixup. Clients null out the keys of deleted
/// entities, so those fall back to the recorded original.
fn reference_value(record: &EntityRecord, fk: &ForeignKeyDescriptor) -> Value {
    let current = record.entity.get(&fk.field);
    if current.is_null() && record.state == EntityState::Deleted {
        return record.original(&fk.field).cloned().unwrap_or(Value::Null);
    }
    current.clone()
}

fn unresolved(
    record: &EntityRecord,
    desc: &EntityTypeDescriptor,
    fk: &ForeignKeyDescriptor,
    key: &EntityKey,
) -> EntityError {
    let error = DbError::UnresolvedReference {
        entity_type: record.type_name().to_string(),
        property: fk.field.clone(),
        target_type: fk.target_type.clone(),
        key: key.to_string(),
    };
    EntityError::new(
        EntityErrorKind::UnresolvedReference,
        record.type_name(),
        desc.key_of(&record.entity).values().to_vec(),
        error.to_string(),
    )
    .with_property(fk.field.clone())
}
