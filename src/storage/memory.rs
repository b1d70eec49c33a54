// ============================================================================
// In-Memory Store
// ============================================================================
//
// Committed state is one persistent `Database` value behind an RwLock.
// A session's transaction works on a private copy taken at begin:
//
//   begin    -> base = working = committed snapshot (O(1) clone)
//   flush    -> staged changes applied to `working`, dependency ordered
//   commit   -> rows in the write set re-checked against committed state
//               (first committer wins), then published
//   rollback -> working copy dropped
//
// Identity sequences live outside transactions and are never rolled back.
//
// ============================================================================

use super::config::StoreConfig;
use super::engine::{SavepointId, StageFailure, StageId, StoreSession};
use super::keygen::{KeyGenerator, NumericKeyGenerator};
use super::table::Table;
use crate::changeset::{Entity, EntityLink};
use crate::core::{ComputedValue, DbError, EntityKey, Result, Row, Value};
use crate::metadata::{EntityTypeDescriptor, KeyGeneration, Metadata};
use crate::transaction::{
    Change, ChangeKind, IsolationLevel, Transaction, TransactionSettings,
};
use chrono::Utc;
use im::{OrdMap, OrdSet};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Nested dependencies followed when ordering a flush; deeper chains are
/// flushed in staging order.
const MAX_DEPENDENCY_DEPTH: usize = 10;

type RowRef = (String, EntityKey);

#[derive(Debug, Clone, Default)]
struct Database {
    tables: OrdMap<String, Table>,
    ledger: OrdSet<Uuid>,
}

impl Database {
    fn new(metadata: &Metadata) -> Self {
        Self {
            tables: metadata
                .type_names()
                .into_iter()
                .map(|name| (name.to_string(), Table::new(name)))
                .collect(),
            ledger: OrdSet::new(),
        }
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::EntityTypeNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::EntityTypeNotFound(name.to_string()))
    }

    fn row(&self, entity_type: &str, key: &EntityKey) -> Option<&Row> {
        self.tables.get(entity_type).and_then(|t| t.get(key))
    }
}

struct SharedState {
    metadata: Metadata,
    config: StoreConfig,
    db: RwLock<Database>,
    sequences: Mutex<HashMap<String, i64>>,
    key_generator: Arc<dyn KeyGenerator>,
}

/// Thread-safe in-memory backing store.
///
/// Cloning is cheap and every clone refers to the same data. Callers open
/// one `MemorySession` per unit of work.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<SharedState>,
}

impl InMemoryStore {
    pub fn new(metadata: Metadata) -> Result<Self> {
        Self::with_config(metadata, StoreConfig::default())
    }

    pub fn with_config(metadata: Metadata, config: StoreConfig) -> Result<Self> {
        let generator = Arc::new(NumericKeyGenerator::new(config.key_block_size));
        Self::with_key_generator(metadata, config, generator)
    }

    pub fn with_key_generator(
        metadata: Metadata,
        config: StoreConfig,
        key_generator: Arc<dyn KeyGenerator>,
    ) -> Result<Self> {
        metadata.validate()?;
        let db = Database::new(&metadata);
        Ok(Self {
            shared: Arc::new(SharedState {
                metadata,
                config,
                db: RwLock::new(db),
                sequences: Mutex::new(HashMap::new()),
                key_generator,
            }),
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.shared.metadata
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            active: None,
            closed: false,
        }
    }

    /// Write a row straight into committed state, outside any transaction.
    ///
    /// Fills computed fields and an absent version, and advances the type's
    /// identity sequence past the seeded key.
    pub fn seed(&self, entity: Entity) -> Result<EntityKey> {
        let desc = self.shared.metadata.get(entity.type_name())?;
        let mut row = normalize_row(desc, entity.fields().clone(), false)?;
        fill_computed(desc, &mut row, None);
        init_version(desc, &mut row);

        let entity = Entity::from_row(desc.name(), row);
        desc.validate_entity(&entity, false)?;
        let key = desc.key_of(&entity);

        {
            let mut db = self.shared.db.write()?;
            db.table_mut(desc.name())?.insert(key.clone(), entity.into_row())?;
        }

        if desc.key_generation() == KeyGeneration::Identity {
            if let Some(id) = key.values().first().and_then(Value::as_i64) {
                let mut sequences = self.shared.sequences.lock()?;
                let current = sequences.entry(desc.name().to_string()).or_insert(0);
                *current = (*current).max(id);
            }
        }
        Ok(key)
    }

    /// Committed image of one entity
    pub fn get(&self, entity_type: &str, key: &EntityKey) -> Result<Option<Entity>> {
        let desc = self.shared.metadata.get(entity_type)?;
        let key = normalize_key(desc, key)?;
        let db = self.shared.db.read()?;
        Ok(db
            .row(entity_type, &key)
            .map(|row| Entity::from_row(entity_type, row.clone())))
    }

    pub fn count(&self, entity_type: &str) -> Result<usize> {
        let db = self.shared.db.read()?;
        Ok(db.table(entity_type)?.len())
    }

    /// All committed entities of one type, in key order
    pub fn entities(&self, entity_type: &str) -> Result<Vec<Entity>> {
        let db = self.shared.db.read()?;
        Ok(db
            .table(entity_type)?
            .iter()
            .map(|(_, row)| Entity::from_row(entity_type, row.clone()))
            .collect())
    }

    pub fn change_set_committed(&self, id: Uuid) -> Result<bool> {
        Ok(self.shared.db.read()?.ledger.contains(&id))
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum StageStatus {
    Pending,
    /// Flushed; holds the real key of the row
    Done(EntityKey),
    Failed,
    /// Not executed because an entity it depends on failed
    Skipped,
}

#[derive(Debug, Clone)]
struct Stage {
    change: Change,
    /// Key as staged, possibly temporary
    key: EntityKey,
    status: StageStatus,
}

#[derive(Debug, Clone, Default)]
struct WorkState {
    working: Database,
    written: BTreeSet<RowRef>,
    read: BTreeSet<RowRef>,
    stages: Vec<Stage>,
}

struct ActiveTransaction {
    txn: Transaction,
    base: Database,
    state: WorkState,
    savepoints: Vec<WorkState>,
}

/// One caller's session on an `InMemoryStore`.
pub struct MemorySession {
    store: InMemoryStore,
    active: Option<ActiveTransaction>,
    closed: bool,
}

fn no_transaction() -> DbError {
    DbError::Transaction("no transaction is open on this session".to_string())
}

impl MemorySession {
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Close the session, discarding any open transaction.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            warn!("Closing session with open transaction {}; rolling back", active.txn.id());
        }
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::SessionClosed);
        }
        Ok(())
    }

    fn active(&self) -> Result<&ActiveTransaction> {
        self.ensure_open()?;
        self.active.as_ref().ok_or_else(no_transaction)
    }

    fn active_mut(&mut self) -> Result<&mut ActiveTransaction> {
        self.ensure_open()?;
        self.active.as_mut().ok_or_else(no_transaction)
    }

    fn stage(&mut self, kind: ChangeKind, entity: &Entity) -> Result<StageId> {
        self.active()?.txn.ensure_active()?;

        let desc = self.store.shared.metadata.get(entity.type_name())?;
        let creating = kind == ChangeKind::Insert;
        let mut staged = Entity::from_row(
            desc.name(),
            normalize_row(desc, entity.fields().clone(), creating)?,
        );
        for (navigation, link) in entity.links() {
            staged.set_link(navigation.clone(), link.clone());
        }

        match kind {
            ChangeKind::Insert | ChangeKind::Update => desc.validate_entity(&staged, creating)?,
            ChangeKind::Delete | ChangeKind::Lock => require_key(desc, &staged)?,
        }
        let key = desc.key_of(&staged);

        let active = self.active_mut()?;
        let id = StageId(active.state.stages.len());
        active.state.stages.push(Stage {
            change: Change::new(kind, staged),
            key,
            status: StageStatus::Pending,
        });
        Ok(id)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            warn!("Session dropped with open transaction {}; rolling back", active.txn.id());
        }
    }
}

impl StoreSession for MemorySession {
    fn metadata(&self) -> &Metadata {
        &self.store.shared.metadata
    }

    fn in_transaction(&self) -> bool {
        !self.closed && self.active.is_some()
    }

    fn begin(&mut self, settings: &TransactionSettings) -> Result<()> {
        self.ensure_open()?;
        if let Some(active) = &self.active {
            return Err(DbError::Transaction(format!(
                "transaction {} is already open on this session",
                active.txn.id()
            )));
        }

        let base = self.store.shared.db.read()?.clone();
        let txn = Transaction::begin(settings.clone());
        debug!("Begin {} ({})", txn.id(), settings.isolation_level);

        self.active = Some(ActiveTransaction {
            txn,
            state: WorkState {
                working: base.clone(),
                ..WorkState::default()
            },
            base,
            savepoints: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        {
            let active = self.active()?;
            active.txn.check_timeout()?;
            let pending = active
                .state
                .stages
                .iter()
                .filter(|s| s.status == StageStatus::Pending)
                .count();
            if pending > 0 {
                return Err(DbError::Transaction(format!(
                    "cannot commit {} with {} unflushed operations",
                    active.txn.id(),
                    pending
                )));
            }
        }

        let mut active = self.active.take().ok_or_else(no_transaction)?;
        let mut db = self.store.shared.db.write()?;

        let serializable = active.txn.settings().isolation_level == IsolationLevel::Serializable;
        let mut checked: Vec<&RowRef> = active.state.written.iter().collect();
        if serializable {
            checked.extend(active.state.read.iter());
        }
        if let Some((entity_type, key)) = checked
            .into_iter()
            .find(|(t, k)| active.base.row(t, k) != db.row(t, k))
        {
            warn!("Commit of {} aborted: {} {} changed concurrently", active.txn.id(), entity_type, key);
            return Err(DbError::Transaction(format!(
                "{} conflicts with a concurrent commit on {} {}",
                active.txn.id(),
                entity_type,
                key
            )));
        }

        let recorded: Vec<Uuid> = active
            .state
            .working
            .ledger
            .iter()
            .filter(|id| !active.base.ledger.contains(*id))
            .copied()
            .collect();
        if let Some(id) = recorded.iter().find(|id| db.ledger.contains(*id)) {
            return Err(DbError::ChangeSetReplayed(*id));
        }

        for (entity_type, key) in &active.state.written {
            let table = db.table_mut(entity_type)?;
            match active.state.working.row(entity_type, key) {
                Some(row) => table.put(key.clone(), row.clone()),
                None => table.discard(key),
            }
        }
        for id in recorded {
            db.ledger.insert(id);
        }

        active.txn.commit()?;
        debug!(
            "Committed {} ({} rows written, {:?} before timeout)",
            active.txn.id(),
            active.state.written.len(),
            active.txn.remaining()
        );
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut active = self.active.take().ok_or_else(no_transaction)?;
        active.txn.rollback()?;
        debug!("Rolled back {}", active.txn.id());
        Ok(())
    }

    fn savepoint(&mut self) -> Result<SavepointId> {
        let active = self.active_mut()?;
        active.savepoints.push(active.state.clone());
        Ok(SavepointId(active.savepoints.len() - 1))
    }

    fn rollback_to_savepoint(&mut self, savepoint: SavepointId) -> Result<()> {
        let active = self.active_mut()?;
        let state = active
            .savepoints
            .get(savepoint.0)
            .cloned()
            .ok_or_else(|| DbError::Transaction(format!("unknown savepoint {}", savepoint.0)))?;
        active.state = state;
        active.savepoints.truncate(savepoint.0 + 1);
        debug!("Rolled back {} to savepoint {}", active.txn.id(), savepoint.0);
        Ok(())
    }

    fn release_savepoint(&mut self, savepoint: SavepointId) -> Result<()> {
        let active = self.active_mut()?;
        if savepoint.0 >= active.savepoints.len() {
            return Err(DbError::Transaction(format!("unknown savepoint {}", savepoint.0)));
        }
        active.savepoints.truncate(savepoint.0);
        Ok(())
    }

    fn create(&mut self, entity: &Entity) -> Result<StageId> {
        self.stage(ChangeKind::Insert, entity)
    }

    fn update(&mut self, entity: &Entity) -> Result<StageId> {
        self.stage(ChangeKind::Update, entity)
    }

    fn delete(&mut self, entity: &Entity) -> Result<StageId> {
        self.stage(ChangeKind::Delete, entity)
    }

    fn lock(&mut self, entity: &Entity) -> Result<StageId> {
        self.stage(ChangeKind::Lock, entity)
    }

    fn load_reference(&mut self, entity_type: &str, key: &EntityKey) -> Result<bool> {
        self.active()?.txn.ensure_active()?;
        let desc = self.store.shared.metadata.get(entity_type)?;
        let key = match normalize_key(desc, key) {
            Ok(key) => key,
            Err(e) if e.is_recoverable() => return Ok(false),
            Err(e) => return Err(e),
        };

        let active = self.active_mut()?;
        if active.state.working.row(entity_type, &key).is_none() {
            return Ok(false);
        }
        active.state.read.insert((entity_type.to_string(), key));
        Ok(true)
    }

    fn flush(&mut self) -> Result<Vec<StageFailure>> {
        self.ensure_open()?;
        let shared = &self.store.shared;
        let active = self.active.as_mut().ok_or_else(no_transaction)?;
        active.txn.ensure_active()?;
        active.txn.check_timeout()?;

        let order = flush_order(&active.state.stages);
        let mut failures = Vec::new();

        for index in order {
            active.txn.check_timeout()?;

            let stage = &active.state.stages[index];
            if is_blocked(&active.state.stages, stage) {
                debug!("Skipping {} {}: a dependency failed", stage.change.type_name(), stage.key);
                active.state.stages[index].status = StageStatus::Skipped;
                continue;
            }

            let change = stage.change.clone();
            match execute(shared, &mut active.state, &change) {
                Ok(key) => active.state.stages[index].status = StageStatus::Done(key),
                Err(e) if e.is_recoverable() => {
                    debug!("{:?} of {} failed: {}", change.kind, change.type_name(), e);
                    active.state.stages[index].status = StageStatus::Failed;
                    failures.push(StageFailure {
                        stage: StageId(index),
                        error: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(failures)
    }

    fn refresh(&self, stage: StageId) -> Result<Option<Entity>> {
        let active = self.active()?;
        let staged = active
            .state
            .stages
            .get(stage.0)
            .ok_or_else(|| DbError::Execution(format!("unknown {}", stage)))?;

        match &staged.status {
            StageStatus::Done(key) if staged.change.keeps_row() => {
                let entity_type = staged.change.type_name();
                Ok(active
                    .state
                    .working
                    .row(entity_type, key)
                    .map(|row| Entity::from_row(entity_type, row.clone())))
            }
            StageStatus::Pending => Err(DbError::Execution(format!("{} has not been flushed", stage))),
            _ => Ok(None),
        }
    }

    fn change_set_committed(&self, id: Uuid) -> Result<bool> {
        self.ensure_open()?;
        match &self.active {
            Some(active) => Ok(active.state.working.ledger.contains(&id)
                || self.store.change_set_committed(id)?),
            None => self.store.change_set_committed(id),
        }
    }

    fn record_change_set(&mut self, id: Uuid) -> Result<()> {
        let active = self.active_mut()?;
        active.txn.ensure_active()?;
        active.state.working.ledger.insert(id);
        Ok(())
    }
}

// ============================================================================
// Flush
// ============================================================================

/// Pending stages in execution order: inserts, updates and locks parents
/// first, then deletes children first.
fn flush_order(stages: &[Stage]) -> Vec<usize> {
    let (deletes, others): (Vec<usize>, Vec<usize>) = stages
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status == StageStatus::Pending)
        .map(|(i, _)| i)
        .partition(|&i| stages[i].change.kind == ChangeKind::Delete);

    let mut order = dependency_order(stages, &others);
    let mut delete_order = dependency_order(stages, &deletes);
    delete_order.reverse();
    order.extend(delete_order);
    order
}

fn dependency_order(stages: &[Stage], subset: &[usize]) -> Vec<usize> {
    let mut visited = vec![false; stages.len()];
    let mut order = Vec::with_capacity(subset.len());
    for &index in subset {
        visit(stages, subset, index, 0, &mut visited, &mut order);
    }
    order
}

fn visit(
    stages: &[Stage],
    subset: &[usize],
    index: usize,
    depth: usize,
    visited: &mut [bool],
    order: &mut Vec<usize>,
) {
    if visited[index] {
        return;
    }
    // Marked before recursing so a cycle ends at the first revisit
    visited[index] = true;

    if depth < MAX_DEPENDENCY_DEPTH {
        let deleting = stages[index].change.kind == ChangeKind::Delete;
        for link in stages[index].change.entity.links().values() {
            if !link.in_change_set {
                continue;
            }
            if let Some(target) = find_target(stages, link, deleting) {
                if subset.contains(&target) {
                    visit(stages, subset, target, depth + 1, visited, order);
                }
            }
        }
    }

    order.push(index);
}

/// Stage of the record a link points at. Deletes only depend on deletes.
fn find_target(stages: &[Stage], link: &EntityLink, deleting: bool) -> Option<usize> {
    stages.iter().position(|s| {
        s.change.type_name() == link.target_type
            && (s.change.kind == ChangeKind::Delete) == deleting
            && s.key.key_eq(&link.target_key)
    })
}

fn is_blocked(stages: &[Stage], stage: &Stage) -> bool {
    let deleting = stage.change.kind == ChangeKind::Delete;
    stage
        .change
        .entity
        .links()
        .values()
        .filter(|link| link.in_change_set)
        .any(|link| match find_target(stages, link, deleting) {
            Some(target) => matches!(
                stages[target].status,
                StageStatus::Failed | StageStatus::Skipped
            ),
            // The target never made it into the unit of work
            None => !deleting,
        })
}

fn execute(shared: &SharedState, work: &mut WorkState, change: &Change) -> Result<EntityKey> {
    let desc = shared.metadata.get(change.type_name())?;
    match change.kind {
        ChangeKind::Insert => execute_insert(shared, desc, work, &change.entity),
        ChangeKind::Update => execute_update(shared, desc, work, &change.entity),
        ChangeKind::Delete => execute_delete(shared, desc, work, &change.entity),
        ChangeKind::Lock => execute_lock(desc, work, &change.entity),
    }
}

fn execute_insert(
    shared: &SharedState,
    desc: &EntityTypeDescriptor,
    work: &mut WorkState,
    entity: &Entity,
) -> Result<EntityKey> {
    let mut row = entity.fields().clone();
    resolve_links(&work.stages, entity, &mut row);

    let generated = match desc.key_generation() {
        KeyGeneration::None => None,
        KeyGeneration::Identity => Some(next_identity(shared, desc)?),
        KeyGeneration::KeyGenerator => Some(shared.key_generator.next_key(desc)?),
    };
    if let (Some(value), Some(field)) = (generated, desc.key_fields().first()) {
        row.insert(field.clone(), value);
    }
    fill_computed(desc, &mut row, None);
    init_version(desc, &mut row);

    let entity = Entity::from_row(desc.name(), normalize_row(desc, row, false)?);
    desc.validate_entity(&entity, false)?;
    check_foreign_keys(shared, desc, work, entity.fields())?;

    let key = desc.key_of(&entity);
    work.working
        .table_mut(desc.name())?
        .insert(key.clone(), entity.into_row())?;
    work.written.insert((desc.name().to_string(), key.clone()));
    Ok(key)
}

fn execute_update(
    shared: &SharedState,
    desc: &EntityTypeDescriptor,
    work: &mut WorkState,
    entity: &Entity,
) -> Result<EntityKey> {
    let key = normalize_key(desc, &desc.key_of(entity))?;
    let existing = work
        .working
        .row(desc.name(), &key)
        .cloned()
        .ok_or_else(|| DbError::EntityNotFound {
            entity_type: desc.name().to_string(),
            key: key.to_string(),
        })?;

    let mut row = existing.clone();
    row.extend(entity.fields().iter().map(|(k, v)| (k.clone(), v.clone())));
    resolve_links(&work.stages, entity, &mut row);

    if let Some(field) = desc.version_field() {
        let incoming = entity.get(&field.name);
        let stored = existing.get(&field.name).cloned().unwrap_or(Value::Null);
        if !stored.is_null() && !incoming.key_eq(&stored) {
            return Err(DbError::ConcurrencyConflict {
                entity_type: desc.name().to_string(),
                key: key.to_string(),
                expected: incoming.to_string(),
                actual: stored.to_string(),
            });
        }
        let next = stored
            .as_i64()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| DbError::Validation {
                entity_type: desc.name().to_string(),
                property: field.name.clone(),
                message: format!("version {} cannot be incremented", stored),
            })?;
        let next = Value::Integer(next).coerce_to(&field.data_type)?;
        row.insert(field.name.clone(), next);
    }
    fill_computed(desc, &mut row, Some(&existing));

    let entity = Entity::from_row(desc.name(), normalize_row(desc, row, false)?);
    desc.validate_entity(&entity, false)?;
    check_foreign_keys(shared, desc, work, entity.fields())?;

    work.working
        .table_mut(desc.name())?
        .update(&key, entity.into_row())?;
    work.written.insert((desc.name().to_string(), key.clone()));
    Ok(key)
}

fn execute_delete(
    shared: &SharedState,
    desc: &EntityTypeDescriptor,
    work: &mut WorkState,
    entity: &Entity,
) -> Result<EntityKey> {
    let key = normalize_key(desc, &desc.key_of(entity))?;
    if work.working.row(desc.name(), &key).is_none() {
        return Err(DbError::EntityNotFound {
            entity_type: desc.name().to_string(),
            key: key.to_string(),
        });
    }

    // Restrict: rows still pointing at this one block the delete
    if let Some(value) = key.values().first() {
        for (referencing, fk) in shared.metadata.referencing(desc.name()) {
            let table = work.working.table(referencing.name())?;
            if let Some((child, _)) = table.find_referencing(&fk.field, value) {
                return Err(DbError::ForeignKeyViolation(format!(
                    "{} {} is still referenced by {} {} through '{}'",
                    desc.name(),
                    key,
                    referencing.name(),
                    child,
                    fk.field
                )));
            }
        }
    }

    work.working.table_mut(desc.name())?.remove(&key)?;
    work.written.insert((desc.name().to_string(), key.clone()));
    Ok(key)
}

fn execute_lock(desc: &EntityTypeDescriptor, work: &mut WorkState, entity: &Entity) -> Result<EntityKey> {
    let key = normalize_key(desc, &desc.key_of(entity))?;
    if work.working.row(desc.name(), &key).is_none() {
        return Err(DbError::EntityNotFound {
            entity_type: desc.name().to_string(),
            key: key.to_string(),
        });
    }
    work.read.insert((desc.name().to_string(), key.clone()));
    Ok(key)
}

// ============================================================================
// Row helpers
// ============================================================================

/// Write each link's target key into its foreign-key field. In-set targets
/// that have been flushed contribute their real key.
fn resolve_links(stages: &[Stage], entity: &Entity, row: &mut Row) {
    for link in entity.links().values() {
        let target_key = if link.in_change_set {
            match find_target(stages, link, false).map(|t| &stages[t].status) {
                Some(StageStatus::Done(real)) => real,
                _ => &link.target_key,
            }
        } else {
            &link.target_key
        };
        let value = target_key.values().first().cloned().unwrap_or(Value::Null);
        row.insert(link.field.clone(), value);
    }
}

fn check_foreign_keys(
    shared: &SharedState,
    desc: &EntityTypeDescriptor,
    work: &mut WorkState,
    row: &Row,
) -> Result<()> {
    for fk in desc.foreign_keys() {
        let value = row.get(&fk.field).cloned().unwrap_or(Value::Null);
        if value.is_null() {
            continue;
        }

        let missing = || {
            DbError::ForeignKeyViolation(format!(
                "{}.{} = {} references a missing {}",
                desc.name(),
                fk.field,
                value,
                fk.target_type
            ))
        };
        let target = shared.metadata.get(&fk.target_type)?;
        let key = normalize_key(target, &EntityKey::new(vec![value.clone()])).map_err(|_| missing())?;
        if work.working.row(&fk.target_type, &key).is_none() {
            return Err(missing());
        }
        work.read.insert((fk.target_type.clone(), key));
    }
    Ok(())
}

fn next_identity(shared: &SharedState, desc: &EntityTypeDescriptor) -> Result<Value> {
    let field = desc
        .key_fields()
        .first()
        .and_then(|name| desc.get_field(name))
        .ok_or_else(|| DbError::Execution(format!("Entity type '{}' has no key field", desc.name())))?;

    let mut sequences = shared.sequences.lock()?;
    let next = sequences.entry(desc.name().to_string()).or_insert(0);
    *next += 1;
    Value::Integer(*next).coerce_to(&field.data_type)
}

fn fill_computed(desc: &EntityTypeDescriptor, row: &mut Row, existing: Option<&Row>) {
    let now = Value::Timestamp(Utc::now());
    for field in desc.fields() {
        match (field.computed, existing) {
            (Some(ComputedValue::CreatedAt), None) | (Some(ComputedValue::UpdatedAt), _) => {
                row.insert(field.name.clone(), now.clone());
            }
            (Some(ComputedValue::CreatedAt), Some(existing)) => {
                let kept = existing.get(&field.name).cloned().unwrap_or(Value::Null);
                row.insert(field.name.clone(), kept);
            }
            (None, _) => {}
        }
    }
}

fn init_version(desc: &EntityTypeDescriptor, row: &mut Row) {
    if let Some(field) = desc.version_field() {
        if row.get(&field.name).is_none_or(Value::is_null) {
            row.insert(field.name.clone(), Value::Integer(1));
        }
    }
}

/// Convert every declared field to its storage representation. When
/// `creating`, a store-generated key is left alone: it is still temporary.
fn normalize_row(desc: &EntityTypeDescriptor, row: Row, creating: bool) -> Result<Row> {
    row.into_iter()
        .map(|(name, value)| {
            let Some(field) = desc.get_field(&name) else {
                return Ok((name, value));
            };
            if creating && desc.key_generation().is_store_generated() && desc.is_key_field(&name) {
                return Ok((name, value));
            }
            match value.coerce_to(&field.data_type) {
                Ok(coerced) => Ok((name, coerced)),
                Err(e) => Err(DbError::Validation {
                    entity_type: desc.name().to_string(),
                    property: name,
                    message: e.to_string(),
                }),
            }
        })
        .collect()
}

fn normalize_key(desc: &EntityTypeDescriptor, key: &EntityKey) -> Result<EntityKey> {
    if key.values().len() != desc.key_fields().len() {
        return Err(DbError::TypeMismatch(format!(
            "key {} does not fit entity type '{}'",
            key,
            desc.name()
        )));
    }
    desc.key_fields()
        .iter()
        .zip(key.values())
        .map(|(name, value)| {
            let field = desc
                .get_field(name)
                .ok_or_else(|| DbError::FieldNotFound(name.clone(), desc.name().to_string()))?;
            value.coerce_to(&field.data_type)
        })
        .collect::<Result<Vec<_>>>()
        .map(EntityKey::new)
}

fn require_key(desc: &EntityTypeDescriptor, entity: &Entity) -> Result<()> {
    if let Some(missing) = desc.key_fields().iter().find(|k| entity.get(k).is_null()) {
        return Err(DbError::Validation {
            entity_type: desc.name().to_string(),
            property: missing.clone(),
            message: "key value is required".to_string(),
        });
    }
    Ok(())
}
