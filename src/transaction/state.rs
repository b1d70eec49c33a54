// ============================================================================
// Store Transaction Lifecycle
// ============================================================================
//
//   begin ──> InTransaction ──commit──> Committed
//                   │
//                   └──rollback──> RolledBack
//
// A transaction that has left `InTransaction` accepts no further work.
//
// ============================================================================

use super::TransactionSettings;
use crate::core::{DbError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique transaction number, used in log lines and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    InTransaction,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        *self == Self::InTransaction
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InTransaction => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// Lifecycle bookkeeping for one store transaction.
///
/// Holds no rows; stores pair it with whatever snapshot or write buffer
/// they use.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    settings: TransactionSettings,
    started: Instant,
}

impl Transaction {
    pub fn begin(settings: TransactionSettings) -> Self {
        Self {
            id: TransactionId::next(),
            state: TransactionState::InTransaction,
            settings,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }

    /// Time left before the timeout; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.settings.timeout.saturating_sub(self.started.elapsed())
    }

    pub fn check_timeout(&self) -> Result<()> {
        if self.started.elapsed() > self.settings.timeout {
            return Err(DbError::Timeout(self.settings.timeout));
        }
        Ok(())
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(DbError::Transaction(format!("{} is {}", self.id, self.state)))
        }
    }

    pub fn commit(&mut self) -> Result<()> {
        self.finish(TransactionState::Committed)
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.finish(TransactionState::RolledBack)
    }

    fn finish(&mut self, outcome: TransactionState) -> Result<()> {
        self.ensure_active()?;
        self.state = outcome;
        Ok(())
    }
}
