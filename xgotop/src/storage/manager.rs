//! Session directory management

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::{
    load_metadata, save_metadata, BinaryStore, EventStore, JsonlStore, Session, SqliteStore,
    StorageFormat,
};
use crate::domain::StorageError;

/// Owns `<storage-dir>` and the per-session directories below it
pub struct SessionManager {
    base_dir: PathBuf,
}

impl SessionManager {
    /// # Errors
    /// Failure to create `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    /// Start recording `session` in `format`
    ///
    /// # Errors
    /// Directory, metadata, or events file creation failures
    pub fn create(
        &self,
        session: Session,
        format: StorageFormat,
    ) -> Result<Box<dyn EventStore>, StorageError> {
        let dir = self.session_dir(&session.id);
        fs::create_dir_all(&dir)?;
        save_metadata(&dir, &session)?;
        debug!("Created {format} session {} in {}", session.id, dir.display());

        Ok(match format {
            StorageFormat::Jsonl => Box::new(JsonlStore::create(&dir, session)?),
            StorageFormat::Binary => Box::new(BinaryStore::create(&dir, session)?),
            StorageFormat::Sqlite => Box::new(SqliteStore::create(&dir, session)?),
        })
    }

    /// All sessions with readable metadata, oldest first
    ///
    /// # Errors
    /// Failure to read `base_dir`
    pub fn list(&self) -> Result<Vec<Session>, StorageError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match load_metadata(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => debug!("Skipping {}: {e}", path.display()),
            }
        }
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// # Errors
    /// [`StorageError::SessionNotFound`] if the session has no metadata
    pub fn get(&self, id: &str) -> Result<Session, StorageError> {
        load_metadata(&self.session_dir(id))
            .map_err(|_| StorageError::SessionNotFound(id.to_string()))
    }

    /// Open a stored session for reading, detecting its format
    ///
    /// # Errors
    /// [`StorageError::SessionNotFound`] or [`StorageError::NoEventStore`]
    pub fn open(&self, id: &str) -> Result<Box<dyn EventStore>, StorageError> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(StorageError::SessionNotFound(id.to_string()));
        }

        if dir.join(StorageFormat::Sqlite.file_name()).is_file() {
            return Ok(Box::new(SqliteStore::open(&dir)?));
        }
        if dir.join(StorageFormat::Binary.file_name()).is_file() {
            return Ok(Box::new(BinaryStore::open(&dir)?));
        }
        if dir.join(StorageFormat::Jsonl.file_name()).is_file() {
            return Ok(Box::new(JsonlStore::open(&dir)?));
        }
        Err(StorageError::NoEventStore(id.to_string()))
    }

    /// Remove a session and everything recorded in it
    ///
    /// # Errors
    /// [`StorageError::SessionNotFound`] or removal failures
    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(StorageError::SessionNotFound(id.to_string()));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_skips_directories_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let mut older = Session::new(None, "a");
        older.started_at = 100;
        let mut newer = Session::new(None, "b");
        newer.started_at = 200;
        drop(manager.create(newer.clone(), StorageFormat::Binary).unwrap());
        drop(manager.create(older.clone(), StorageFormat::Jsonl).unwrap());
        fs::create_dir(dir.path().join("stray")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let ids: Vec<_> = manager.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[test]
    fn test_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();
        assert!(matches!(manager.get("nope"), Err(StorageError::SessionNotFound(_))));
        assert!(matches!(manager.open("nope"), Err(StorageError::SessionNotFound(_))));
        assert!(matches!(manager.delete("nope"), Err(StorageError::SessionNotFound(_))));
    }

    #[test]
    fn test_open_without_events_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();
        let session = Session::new(None, "a");
        let session_dir = dir.path().join(&session.id);
        fs::create_dir(&session_dir).unwrap();
        save_metadata(&session_dir, &session).unwrap();

        assert!(matches!(manager.open(&session.id), Err(StorageError::NoEventStore(_))));
    }

    #[test]
    fn test_delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();
        let session = Session::new(None, "a");
        drop(manager.create(session.clone(), StorageFormat::Binary).unwrap());

        manager.delete(&session.id).unwrap();
        assert!(!dir.path().join(&session.id).exists());
        assert!(manager.list().unwrap().is_empty());
    }
}
