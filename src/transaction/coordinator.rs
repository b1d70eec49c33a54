use super::{TransactionSettings, TransactionState};
use crate::core::Result;
use crate::storage::{SavepointId, StoreSession};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Opened by this scope; committed or rolled back by it
    Owned,
    /// Caller's transaction; only the savepoint taken at begin is ours
    Ambient(SavepointId),
}

/// Scoped ownership of the store transaction a save runs in.
///
/// Reuses the session's open transaction when there is one, guarding it with
/// a savepoint instead of committing or rolling it back. A scope dropped
/// without `commit` or `rollback` rolls back.
pub struct TransactionScope<'s, S: StoreSession + ?Sized> {
    session: &'s mut S,
    ownership: Ownership,
    state: TransactionState,
}

impl<'s, S: StoreSession + ?Sized> TransactionScope<'s, S> {
    pub fn begin(session: &'s mut S, settings: &TransactionSettings) -> Result<Self> {
        let ownership = if session.in_transaction() {
            let savepoint = session.savepoint()?;
            debug!(savepoint = savepoint.0, "joining ambient transaction");
            Ownership::Ambient(savepoint)
        } else {
            session.begin(settings)?;
            Ownership::Owned
        };

        Ok(Self {
            session,
            ownership,
            state: TransactionState::InTransaction,
        })
    }

    pub fn is_ambient(&self) -> bool {
        matches!(self.ownership, Ownership::Ambient(_))
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn session(&mut self) -> &mut S {
        &mut *self.session
    }

    pub fn session_ref(&self) -> &S {
        &*self.session
    }

    /// Commit an owned transaction, or release the savepoint of an ambient one.
    ///
    /// If an owned commit fails and the store left the transaction open, it
    /// is rolled back before the error is returned.
    pub fn commit(mut self) -> Result<()> {
        let result = match self.ownership {
            Ownership::Owned => self.session.commit(),
            Ownership::Ambient(savepoint) => self.session.release_savepoint(savepoint),
        };

        match result {
            Ok(()) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Err(e) => {
                self.undo();
                Err(e)
            }
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.state = TransactionState::RolledBack;
        match self.ownership {
            Ownership::Owned if self.session.in_transaction() => self.session.rollback(),
            Ownership::Owned => Ok(()),
            Ownership::Ambient(savepoint) => {
                self.session.rollback_to_savepoint(savepoint)?;
                self.session.release_savepoint(savepoint)
            }
        }
    }

    /// Best-effort rollback used on error paths where the original error wins.
    fn undo(&mut self) {
        self.state = TransactionState::RolledBack;
        let result = match self.ownership {
            Ownership::Owned if self.session.in_transaction() => self.session.rollback(),
            Ownership::Owned => Ok(()),
            Ownership::Ambient(savepoint) => self
                .session
                .rollback_to_savepoint(savepoint)
                .and_then(|_| self.session.release_savepoint(savepoint)),
        };
        if let Err(e) = result {
            warn!(error = %e, "rollback failed");
        }
    }
}

impl<S: StoreSession + ?Sized> Drop for TransactionScope<'_, S> {
    fn drop(&mut self) {
        if self.state.is_active() {
            warn!("transaction scope dropped while active; rolling back");
            self.undo();
        }
    }
}
