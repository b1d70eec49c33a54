use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    // ------------------------------------------------------------------
    // Recoverable: reported per entity, the batch rolls back
    // ------------------------------------------------------------------
    #[error("Validation failed for {entity_type}.{property}: {message}")]
    Validation {
        entity_type: String,
        property: String,
        message: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Duplicate key {key} for entity type '{entity_type}'")]
    DuplicateKey { entity_type: String, key: String },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Concurrency conflict on {entity_type} {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        entity_type: String,
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Entity {entity_type} {key} not found")]
    EntityNotFound { entity_type: String, key: String },

    #[error("Unresolved reference {entity_type}.{property} -> {target_type} {key}")]
    UnresolvedReference {
        entity_type: String,
        property: String,
        target_type: String,
        key: String,
    },

    // ------------------------------------------------------------------
    // Fatal: rollback, then propagate unchanged
    // ------------------------------------------------------------------
    #[error("Entity type '{0}' not found")]
    EntityTypeNotFound(String),

    #[error("Field '{0}' not found on entity type '{1}'")]
    FieldNotFound(String, String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Change-set {0} has already been committed")]
    ChangeSetReplayed(Uuid),

    #[error("Execution error: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Classifies the error for the save pipeline.
    ///
    /// `Some` marks a failure that belongs to one entity and is collected into
    /// the save result; `None` marks an infrastructure failure that aborts
    /// the whole save.
    pub fn entity_error_kind(&self) -> Option<EntityErrorKind> {
        match self {
            Self::Validation { .. } | Self::TypeMismatch(_) => Some(EntityErrorKind::ValidationError),
            Self::DuplicateKey { .. } => Some(EntityErrorKind::DuplicateKey),
            Self::ForeignKeyViolation(_) => Some(EntityErrorKind::ForeignKeyViolation),
            Self::ConcurrencyConflict { .. } => Some(EntityErrorKind::ConcurrencyConflict),
            Self::EntityNotFound { .. } => Some(EntityErrorKind::NotFound),
            Self::UnresolvedReference { .. } => Some(EntityErrorKind::UnresolvedReference),
            _ => None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.entity_error_kind().is_some()
    }

    pub fn property_name(&self) -> Option<&str> {
        match self {
            Self::Validation { property, .. } | Self::UnresolvedReference { property, .. } => {
                Some(property)
            }
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<regex::Error> for DbError {
    fn from(err: regex::Error) -> Self {
        Self::Execution(format!("Invalid pattern: {}", err))
    }
}

/// Machine-readable category of a per-entity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityErrorKind {
    ValidationError,
    UnresolvedReference,
    ConcurrencyConflict,
    DuplicateKey,
    ForeignKeyViolation,
    NotFound,
    Rejected,
}

impl fmt::Display for EntityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidationError => "ValidationError",
            Self::UnresolvedReference => "UnresolvedReference",
            Self::ConcurrencyConflict => "ConcurrencyConflict",
            Self::DuplicateKey => "DuplicateKey",
            Self::ForeignKeyViolation => "ForeignKeyViolation",
            Self::NotFound => "NotFound",
            Self::Rejected => "Rejected",
        };
        write!(f, "{}", name)
    }
}
