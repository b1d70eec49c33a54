use crate::changeset::Entity;
use crate::core::{DbError, EntityKey, Result};
use crate::metadata::Metadata;
use crate::transaction::TransactionSettings;
use std::fmt;
use uuid::Uuid;

/// Handle to an operation staged in a session's unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavepointId(pub usize);

/// A staged operation the store refused during flush.
///
/// Only recoverable errors are reported this way; anything fatal aborts the
/// flush with `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: StageId,
    pub error: DbError,
}

/// One caller's session against a backing store.
///
/// Sessions are used by a single thread at a time; concurrent callers each
/// open their own. Staging calls (`create`, `update`, `delete`, `lock`)
/// validate the entity and record the operation; nothing reaches the store
/// until `flush`.
pub trait StoreSession {
    fn metadata(&self) -> &Metadata;

    // ==================== Transaction lifecycle ====================

    fn in_transaction(&self) -> bool;

    /// Begin a transaction; fails if one is already open
    fn begin(&mut self, settings: &TransactionSettings) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn savepoint(&mut self) -> Result<SavepointId>;

    /// Undo everything staged or flushed since the savepoint; the savepoint stays valid
    fn rollback_to_savepoint(&mut self, savepoint: SavepointId) -> Result<()>;

    fn release_savepoint(&mut self, savepoint: SavepointId) -> Result<()>;

    // ==================== Unit of work ====================

    fn create(&mut self, entity: &Entity) -> Result<StageId>;

    /// Stage an update; the entity's version field must hold the pre-image
    fn update(&mut self, entity: &Entity) -> Result<StageId>;

    fn delete(&mut self, entity: &Entity) -> Result<StageId>;

    /// Re-attach an unchanged entity so flush sees it without writing it
    fn lock(&mut self, entity: &Entity) -> Result<StageId>;

    /// Check that a persisted row exists and pin it for the rest of the transaction
    fn load_reference(&mut self, entity_type: &str, key: &EntityKey) -> Result<bool>;

    fn flush(&mut self) -> Result<Vec<StageFailure>>;

    /// Persisted image of a flushed stage; `None` if the stage wrote no row
    fn refresh(&self, stage: StageId) -> Result<Option<Entity>>;

    // ==================== Replay ledger ====================

    fn change_set_committed(&self, id: Uuid) -> Result<bool>;

    /// Record a change-set id; it becomes visible to others when the transaction commits
    fn record_change_set(&mut self, id: Uuid) -> Result<()>;
}
