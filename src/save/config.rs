use crate::transaction::TransactionSettings;
use serde::{Deserialize, Serialize};

/// Save pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Settings for the transaction a save opens (ignored when joining an ambient one)
    pub transaction: TransactionSettings,

    /// Re-read Modified entities after flush. Added entities are always
    /// re-read, since their keys change.
    pub refresh_after_save: bool,

    /// Reject a change-set whose id is already in the store's ledger
    pub reject_replayed_change_sets: bool,
}

impl SaveConfig {
    pub fn new() -> Self {
        Self {
            transaction: TransactionSettings::default(),
            refresh_after_save: true,
            reject_replayed_change_sets: true,
        }
    }

    /// Set the transaction settings
    pub fn transaction(mut self, settings: TransactionSettings) -> Self {
        self.transaction = settings;
        self
    }

    pub fn refresh_after_save(mut self, refresh: bool) -> Self {
        self.refresh_after_save = refresh;
        self
    }

    pub fn reject_replayed_change_sets(mut self, reject: bool) -> Self {
        self.reject_replayed_change_sets = reject;
        self
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self::new()
    }
}
