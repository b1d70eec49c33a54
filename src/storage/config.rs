use serde::{Deserialize, Serialize};

use super::keygen::NumericKeyGenerator;

/// In-memory store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Ids the default numeric key generator reserves at a time
    pub key_block_size: usize,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            key_block_size: NumericKeyGenerator::DEFAULT_BLOCK_SIZE,
        }
    }

    /// Set the key block size
    pub fn key_block_size(mut self, size: usize) -> Self {
        self.key_block_size = size;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
