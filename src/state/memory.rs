//! In-process store for tests

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use super::{pending_from_value, PersistedState, StateError, StateStore};
use crate::alerts::PendingAlert;

/// Keeps both documents as JSON values so loads go through the same lenient
/// decoding as the file store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Option<Value>>,
    pending: RwLock<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw documents, as if read back from disk
    pub fn with_documents(state: Option<Value>, pending: Option<Value>) -> Self {
        Self {
            state: RwLock::new(state),
            pending: RwLock::new(pending),
        }
    }

    pub fn state_document(&self) -> Option<Value> {
        self.state.read().clone()
    }

    pub fn pending_document(&self) -> Option<Value> {
        self.pending.read().clone()
    }
}

impl StateStore for MemoryStore {
    fn load_state(&self) -> Result<PersistedState, StateError> {
        let now = Utc::now();
        Ok(match self.state.read().as_ref() {
            Some(value) => PersistedState::from_value(value, now),
            None => PersistedState::new(now),
        })
    }

    fn save_state(&self, state: &mut PersistedState) -> Result<(), StateError> {
        state.last_updated = Utc::now();
        let value = state.to_value()?;
        *self.state.write() = Some(value);
        Ok(())
    }

    fn load_pending(&self) -> Result<Vec<PendingAlert>, StateError> {
        Ok(self
            .pending
            .read()
            .clone()
            .map(pending_from_value)
            .unwrap_or_default())
    }

    fn save_pending(&self, pending: &[PendingAlert]) -> Result<(), StateError> {
        let value = serde_json::to_value(pending)?;
        *self.pending.write() = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeded_garbage_loads_as_defaults() {
        let store = MemoryStore::with_documents(Some(json!("garbage")), Some(json!(17)));
        assert!(store.load_state().unwrap().is_first_run());
        assert!(store.load_pending().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        let mut state = store.load_state().unwrap();
        state.meta.record_sent("abc");
        store.save_state(&mut state).unwrap();

        assert!(store.load_state().unwrap().meta.was_sent("abc"));
        assert!(store.state_document().unwrap()["meta"]["sent_alert_ids"].is_array());
    }
}
