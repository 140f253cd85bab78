//! Lock-guarded persistence of one backing file

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::aml;
use crate::state::AgentState;

/// Errors surfaced by [`StateStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file does not exist
    #[error("state file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// Reading or writing the backing file failed
    #[error("failed to access state file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Owns the in-memory state of a single backing file.
///
/// `load` and `save` serialize on one non-reentrant lock. Callers always get
/// owned snapshots, so the lock is never held outside these methods.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<AgentState>,
}

impl StateStore {
    /// Create a store for `path` without touching the file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(AgentState::default()),
        }
    }

    /// Create a store and load it immediately
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the backing file and replace the held state
    pub fn load(&self) -> Result<AgentState, StoreError> {
        let mut held = self.state.lock();

        let text = fs::read_to_string(&self.path).map_err(|e| self.map_io(e))?;
        *held = aml::decode(&text);

        debug!(
            path = %self.path.display(),
            tasks = held.todo.len(),
            memory = held.memory.len(),
            "Loaded state"
        );
        Ok(held.clone())
    }

    /// Persist the held state, adopting `state` first when given
    pub fn save(&self, state: Option<AgentState>) -> Result<(), StoreError> {
        let mut held = self.state.lock();
        if let Some(state) = state {
            *held = state;
        }

        let text = aml::encode(&held);
        fs::write(&self.path, text).map_err(|e| self.map_io(e))?;

        info!(path = %self.path.display(), "State saved");
        Ok(())
    }

    /// Snapshot of the held state without touching the file
    pub fn state(&self) -> AgentState {
        self.state.lock().clone()
    }

    /// Apply `f` to a copy of the held state, then persist it
    pub fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut AgentState),
    {
        let mut snapshot = self.state();
        f(&mut snapshot);
        self.save(Some(snapshot))
    }

    fn map_io(&self, source: io::Error) -> StoreError {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound {
                path: self.path.clone(),
            }
        } else {
            StoreError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{TodoItem, TodoStatus};
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("absent.md"));

        match store.load() {
            Err(StoreError::NotFound { path }) => assert!(path.ends_with("absent.md")),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.md");
        fs::write(&path, "<todo>\n? first\n</todo>\n").unwrap();

        let store = StateStore::open(&path).unwrap();
        let mut state = store.state();
        state.mark_done("first");
        state.push_task("second");
        store.save(Some(state)).unwrap();

        let reloaded = StateStore::open(&path).unwrap().state();
        assert_eq!(reloaded.todo.len(), 2);
        assert_eq!(reloaded.todo[0].status, TodoStatus::Done);
        assert_eq!(reloaded.todo[1], TodoItem::new("second"));
    }

    #[test]
    fn test_save_without_state_writes_held_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.md");
        fs::write(&path, "<memory>\nkept\n</memory>").unwrap();

        let store = StateStore::open(&path).unwrap();
        store.save(None).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("<memory>\nkept\n</memory>"));
        assert!(text.contains("<todo>\n</todo>"));
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nope").join("agent.md"));

        let err = store.save(Some(AgentState::new())).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. } | StoreError::Io { .. }));
    }

    #[test]
    fn test_update_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.md");
        fs::write(&path, "").unwrap();

        let store = StateStore::open(&path).unwrap();
        store.update(|s| s.insert_task_front("urgent")).unwrap();

        assert_eq!(store.load().unwrap().todo[0].content, "urgent");
    }
}
