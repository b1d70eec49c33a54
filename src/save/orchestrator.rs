use super::processor::apply;
use super::{
    EntityError, KeyMappingTracker, NoopInterceptor, RelationshipFixer, SaveConfig,
    SaveInterceptor, SaveResult,
};
use crate::changeset::{ChangeSet, EntityState, RecordId};
use crate::core::{DbError, EntityErrorKind, Result};
use crate::metadata::Metadata;
use crate::storage::{StageId, StoreSession};
use crate::transaction::TransactionScope;
use std::collections::HashSet;
use tracing::{Level, debug, event, info_span, warn};

/// Drives one change-set through the store.
///
/// A save either persists every record or none. Per-entity failures come
/// back as `SaveResult::errors`; infrastructure failures come back as `Err`
/// after the transaction was rolled back.
pub struct SaveOrchestrator<I: SaveInterceptor = NoopInterceptor> {
    config: SaveConfig,
    interceptor: I,
}

/// What the transactional part of a save produced
enum Outcome {
    Rejected(Vec<EntityError>),
    Saved(KeyMappingTracker),
}

impl SaveOrchestrator {
    pub fn new(config: SaveConfig) -> Self {
        Self::with_interceptor(config, NoopInterceptor)
    }
}

impl Default for SaveOrchestrator {
    fn default() -> Self {
        Self::new(SaveConfig::default())
    }
}

impl<I: SaveInterceptor> SaveOrchestrator<I> {
    pub fn with_interceptor(config: SaveConfig, interceptor: I) -> Self {
        Self {
            config,
            interceptor,
        }
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    pub fn interceptor(&self) -> &I {
        &self.interceptor
    }

    pub fn save<S: StoreSession + ?Sized>(
        &self,
        session: &mut S,
        change_set: ChangeSet,
    ) -> Result<SaveResult> {
        let span = info_span!(
            "saveset.save",
            change_set = %change_set.id(),
            records = change_set.len()
        );
        let _guard = span.enter();

        let mut change_set = change_set.retain(|record| self.interceptor.before_save_entity(record));
        if let Err(errors) = self.interceptor.before_save_entities(&change_set) {
            event!(Level::INFO, errors = errors.len(), "change-set rejected by interceptor");
            return Ok(SaveResult::failed(change_set.id(), errors));
        }

        if session.change_set_committed(change_set.id())? {
            event!(Level::WARN, "change-set replayed");
            if self.config.reject_replayed_change_sets {
                return Err(DbError::ChangeSetReplayed(change_set.id()));
            }
            return replay_errors(session.metadata(), &change_set)
                .map(|errors| SaveResult::failed(change_set.id(), errors));
        }

        // Descriptors are read while the session is mutably borrowed
        let metadata = session.metadata().clone();
        let mut scope = TransactionScope::begin(session, &self.config.transaction)?;

        let tracker = match self.process(&mut scope, &metadata, &mut change_set) {
            Ok(Outcome::Saved(tracker)) => tracker,
            Ok(Outcome::Rejected(errors)) => {
                event!(Level::INFO, errors = errors.len(), "save rolled back");
                scope.rollback()?;
                return Ok(SaveResult::failed(change_set.id(), errors));
            }
            Err(e) => {
                event!(Level::ERROR, error = %e, "save aborted");
                if let Err(rollback_error) = scope.rollback() {
                    warn!(error = %rollback_error, "rollback after failed save");
                }
                return Err(e);
            }
        };

        scope.commit()?;
        let key_mappings = tracker.into_mappings();
        self.interceptor.after_save_entities(&change_set, &key_mappings);
        event!(
            Level::INFO,
            entities = change_set.len(),
            key_mappings = key_mappings.len(),
            "save committed"
        );

        let change_set_id = change_set.id();
        let entities = change_set
            .ordered_ids()
            .into_iter()
            .filter_map(|id| change_set.record(id).map(|record| record.entity.clone()))
            .collect();

        Ok(SaveResult {
            change_set_id,
            entities,
            key_mappings,
            errors: Vec::new(),
        })
    }

    fn process<S: StoreSession + ?Sized>(
        &self,
        scope: &mut TransactionScope<'_, S>,
        metadata: &Metadata,
        change_set: &mut ChangeSet,
    ) -> Result<Outcome> {
        let fixer = RelationshipFixer::new(metadata);
        let mut errors = fixer.fix_in_set(change_set)?;

        let mut tracker = KeyMappingTracker::new();
        let mut stages: Vec<(RecordId, StageId)> = Vec::with_capacity(change_set.len());
        let mut failed = HashSet::new();
        for id in change_set.ordered_ids() {
            let record = change_set
                .record_mut(id)
                .ok_or_else(|| DbError::Execution(format!("record {} vanished", id)))?;
            let desc = metadata.get(record.type_name())?;

            match apply(scope.session(), record, desc, &mut tracker) {
                Ok(stage) => stages.push((id, stage)),
                Err(e) => match EntityError::from_db_error(record, desc, &e) {
                    Some(error) => {
                        errors.push(error);
                        failed.insert(id);
                    }
                    None => return Err(e),
                },
            }
        }
        debug!(staged = stages.len(), "records applied");

        errors.extend(fixer.fix_persisted(change_set, scope.session(), &failed)?);
        if !errors.is_empty() {
            return Ok(Outcome::Rejected(errors));
        }

        scope.session().record_change_set(change_set.id())?;
        for failure in scope.session().flush()? {
            let Some(&(id, _)) = stages.iter().find(|(_, stage)| *stage == failure.stage) else {
                return Err(failure.error);
            };
            let record = change_set
                .record(id)
                .ok_or_else(|| DbError::Execution(format!("record {} vanished", id)))?;
            let desc = metadata.get(record.type_name())?;
            match EntityError::from_db_error(record, desc, &failure.error) {
                Some(error) => errors.push(error),
                None => return Err(failure.error),
            }
        }
        if !errors.is_empty() {
            return Ok(Outcome::Rejected(errors));
        }

        fixer.remove_relationships(change_set);
        self.refresh(scope, metadata, change_set, &stages)?;

        for (id, _) in &stages {
            let Some(record) = change_set.record(*id) else {
                continue;
            };
            if record.state == EntityState::Added {
                tracker.finalize(record, metadata.get(record.type_name())?);
            }
        }
        Ok(Outcome::Saved(tracker))
    }

    /// Copy store-assigned values back into the submitted entities.
    ///
    /// Modified entities always take the store's version, even when a full
    /// refresh is off: the field still holds the pre-image restored for the
    /// concurrency check.
    fn refresh<S: StoreSession + ?Sized>(
        &self,
        scope: &TransactionScope<'_, S>,
        metadata: &Metadata,
        change_set: &mut ChangeSet,
        stages: &[(RecordId, StageId)],
    ) -> Result<()> {
        for (id, stage) in stages {
            let Some(record) = change_set.record_mut(*id) else {
                continue;
            };
            let version = metadata
                .get(record.type_name())?
                .version_field()
                .map(|field| field.name.clone());
            let full = match record.state {
                EntityState::Added => true,
                EntityState::Modified => self.config.refresh_after_save,
                EntityState::Deleted | EntityState::Unchanged => false,
            };
            let version_only = record.state == EntityState::Modified && !full && version.is_some();
            if !full && !version_only {
                continue;
            }
            let Some(fresh) = scope.session_ref().refresh(*stage)? else {
                continue;
            };
            match version {
                Some(field) if !full => {
                    let value = fresh.get(&field).clone();
                    record.entity.set(field, value);
                }
                _ => record.entity = fresh,
            }
        }
        Ok(())
    }
}

/// One duplicate-key error per record of a change-set the store already
/// committed. Nothing is staged, so a replay can never write rows twice.
fn replay_errors(metadata: &Metadata, change_set: &ChangeSet) -> Result<Vec<EntityError>> {
    let message = DbError::ChangeSetReplayed(change_set.id()).to_string();
    change_set
        .ordered_ids()
        .into_iter()
        .filter_map(|id| change_set.record(id))
        .map(|record| {
            let desc = metadata.get(record.type_name())?;
            Ok(EntityError::new(
                EntityErrorKind::DuplicateKey,
                record.type_name(),
                desc.key_of(&record.entity).values().to_vec(),
                message.clone(),
            ))
        })
        .collect()
}
