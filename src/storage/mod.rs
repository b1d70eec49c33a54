pub mod config;
pub mod engine;
pub mod keygen;
pub mod memory;
pub mod table;

pub use config::StoreConfig;
pub use engine::{SavepointId, StageFailure, StageId, StoreSession};
pub use keygen::{KeyGenerator, NumericKeyGenerator, UuidKeyGenerator};
pub use memory::{InMemoryStore, MemorySession};
pub use table::Table;
