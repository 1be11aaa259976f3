//! Persisted state between runs
//!
//! Two JSON documents survive a run: the state document (targets, digest
//! logs, run bookkeeping) and the pending-alert queue. Both are loaded once at
//! the start of a run and written back atomically at the end.

pub mod bounded;
pub mod file;
#[cfg(test)]
pub mod memory;
pub mod model;

pub use bounded::BoundedLog;
pub use file::JsonFileStore;
#[cfg(test)]
pub use memory::MemoryStore;
pub use model::{ChangeRecord, DigestLog, FailedCheck, PersistedState, RunMeta, TargetState};

use serde_json::Value;

use crate::alerts::PendingAlert;

/// Storage for the two run documents
pub trait StateStore: Send + Sync {
    /// Load the state document; missing or corrupt input yields defaults
    fn load_state(&self) -> Result<PersistedState, StateError>;

    /// Replace the state document atomically, stamping `last_updated`
    fn save_state(&self, state: &mut PersistedState) -> Result<(), StateError>;

    /// Load queued alerts, dropping records that fail validation
    fn load_pending(&self) -> Result<Vec<PendingAlert>, StateError>;

    /// Replace the pending-alert document atomically
    fn save_pending(&self, pending: &[PendingAlert]) -> Result<(), StateError>;
}

/// Decode pending records one by one, keeping the valid ones
pub(crate) fn pending_from_value(value: Value) -> Vec<PendingAlert> {
    let Value::Array(records) = value else {
        tracing::warn!("Pending alert document is not an array, ignoring it");
        return Vec::new();
    };

    records
        .into_iter()
        .filter_map(|record| {
            let parsed = serde_json::from_value::<PendingAlert>(record.clone())
                .map_err(|e| e.to_string())
                .and_then(|pending| pending.validate().map(|()| pending));
            match parsed {
                Ok(pending) => Some(pending),
                Err(reason) => {
                    tracing::warn!(%reason, pending = %record, "Invalid pending alert dropped");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
