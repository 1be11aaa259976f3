//! JSON file store with atomic replace

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use super::{pending_from_value, PersistedState, StateError, StateStore};
use crate::alerts::PendingAlert;

/// State and pending documents on the local filesystem
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state_path: PathBuf,
    pending_path: PathBuf,
}

impl JsonFileStore {
    /// Create the store, making sure both parent directories exist
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(state_path: P, pending_path: Q) -> Result<Self, StateError> {
        let state_path = state_path.as_ref().to_path_buf();
        let pending_path = pending_path.as_ref().to_path_buf();
        for path in [&state_path, &pending_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            state_path,
            pending_path,
        })
    }

    #[cfg(test)]
    fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Read a JSON document. Missing, empty and unparseable files all read as `None`.
    fn read_json(path: &Path) -> Result<Option<Value>, StateError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt JSON document, using defaults");
                Ok(None)
            }
        }
    }

    /// Pretty, key-sorted JSON written to a sibling temp file and renamed into place
    fn write_json<T: Serialize>(path: &Path, document: &T) -> Result<(), StateError> {
        // Going through Value sorts object keys
        let value = serde_json::to_value(document)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &value)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Result<PersistedState, StateError> {
        let now = Utc::now();
        Ok(match Self::read_json(&self.state_path)? {
            Some(value) => PersistedState::from_value(&value, now),
            None => PersistedState::new(now),
        })
    }

    fn save_state(&self, state: &mut PersistedState) -> Result<(), StateError> {
        state.last_updated = Utc::now();
        Self::write_json(&self.state_path, state)
    }

    fn load_pending(&self) -> Result<Vec<PendingAlert>, StateError> {
        Ok(Self::read_json(&self.pending_path)?
            .map(pending_from_value)
            .unwrap_or_default())
    }

    fn save_pending(&self, pending: &[PendingAlert]) -> Result<(), StateError> {
        Self::write_json(&self.pending_path, &pending)
    }
}
