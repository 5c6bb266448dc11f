use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::training::ClassifierState;

/// On-disk format revision of the state file.
const FORMAT_VERSION: u32 = 1;

/// Durable home of the fitted classifier.
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<ClassifierState>, PersistenceError>;
    fn save(&self, state: &ClassifierState) -> Result<(), PersistenceError>;
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    format: u32,
    state: ClassifierState,
}

/// Classifier state serialized as JSON, replaced atomically on save.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> PersistenceError {
        PersistenceError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<ClassifierState>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).map_err(|e| self.io(e))?;
        let file: StateFile = serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))?;
        if file.format != FORMAT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported format {} (expected {FORMAT_VERSION})",
                file.format
            )));
        }
        file.state.validate().map_err(|e| self.corrupt(e))?;
        Ok(Some(file.state))
    }

    fn save(&self, state: &ClassifierState) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.io(e))?;
        }
        let file = StateFile {
            format: FORMAT_VERSION,
            state: state.clone(),
        };
        let bytes = serde_json::to_vec(&file)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).map_err(|e| self.io(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::bootstrap;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("classifier.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn round_trips_state_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("nested").join("classifier.json"));
        let state = bootstrap::bootstrap_state(&[], &Default::default(), 1);

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = JsonStateStore::new(&path);
        assert!(matches!(store.load(), Err(PersistenceError::Corrupt { .. })));
    }
}
