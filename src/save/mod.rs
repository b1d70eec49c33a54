// ============================================================================
// Save Pipeline
// ============================================================================
//
// Hooks -> transaction -> in-set fixup -> apply -> persisted fixup -> flush
// -> refresh -> key mappings -> commit. Any per-entity error rolls the whole
// change-set back.
//
// ============================================================================

pub mod concurrency;
pub mod config;
pub mod interceptor;
pub mod key_mapping;
pub mod orchestrator;
pub mod processor;
pub mod relationship;
pub mod result;

pub use concurrency::restore_version;
pub use config::SaveConfig;
pub use interceptor::{NoopInterceptor, SaveInterceptor};
pub use key_mapping::KeyMappingTracker;
pub use orchestrator::SaveOrchestrator;
pub use relationship::RelationshipFixer;
pub use result::{EntityError, KeyMapping, SaveResult};
