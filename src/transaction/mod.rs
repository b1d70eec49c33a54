// ============================================================================
// Transaction Management Module
// ============================================================================
//
// - State: lifecycle of one store transaction (InTransaction ->
//   Committed | RolledBack)
// - Change: staged unit-of-work commands
// - Coordinator: scoped begin/commit/rollback, reusing an ambient
//   transaction through a savepoint
//
// ============================================================================

pub mod change;
pub mod coordinator;
pub mod settings;
pub mod state;

pub use change::{Change, ChangeKind};
pub use coordinator::TransactionScope;
pub use settings::{IsolationLevel, TransactionSettings};
pub use state::{Transaction, TransactionId, TransactionState};
