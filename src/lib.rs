// ============================================================================
// saveset Library
// ============================================================================
//
// Transactional persistence of client change-sets: validation, relationship
// fixup, dependency-ordered flush, optimistic concurrency and temporary key
// mapping over a pluggable store session.
//
// ============================================================================

pub mod changeset;
pub mod core;
pub mod metadata;
pub mod save;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use changeset::{ChangeSet, Entity, EntityRecord, EntityState, RecordId};
pub use crate::core::{DataType, DbError, EntityErrorKind, EntityKey, FieldDescriptor, Result, Value};
pub use metadata::{EntityTypeDescriptor, KeyGeneration, Metadata};
pub use save::{
    EntityError, KeyMapping, SaveConfig, SaveInterceptor, SaveOrchestrator, SaveResult,
};
pub use storage::{InMemoryStore, MemorySession, StoreConfig, StoreSession};
pub use transaction::{IsolationLevel, TransactionSettings};

/// Save `change_set` with the default pipeline configuration.
///
/// # Examples
///
/// ```
/// use saveset::{ChangeSet, DataType, Entity, EntityTypeDescriptor, FieldDescriptor};
/// use saveset::{InMemoryStore, KeyGeneration, Metadata, Value};
///
/// # fn main() -> saveset::Result<()> {
/// let metadata = Metadata::new().with_type(
///     EntityTypeDescriptor::new("TodoList")
///         .field(FieldDescriptor::new("id", DataType::Integer))
///         .field(FieldDescriptor::new("title", DataType::Text).not_null())
///         .key("id")
///         .generated_by(KeyGeneration::Identity),
/// )?;
/// let store = InMemoryStore::new(metadata)?;
///
/// let mut change_set = ChangeSet::new();
/// change_set.add(Entity::new("TodoList").with("id", -1).with("title", "Groceries"));
///
/// let result = saveset::save(&mut store.session(), change_set)?;
/// assert!(result.is_success());
/// assert_eq!(result.key_mappings[0].temp_value, Value::Integer(-1));
/// # Ok(())
/// # }
/// ```
pub fn save<S: StoreSession + ?Sized>(session: &mut S, change_set: ChangeSet) -> Result<SaveResult> {
    SaveOrchestrator::new(SaveConfig::default()).save(session, change_set)
}
