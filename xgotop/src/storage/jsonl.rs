//! JSON Lines event store (`events.jsonl`)

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use xgotop_common::{GoRuntimeEvent, ATTRIBUTE_COUNT};

use super::{load_metadata, save_metadata, EventFilter, EventStore, Session, StorageFormat};
use crate::domain::StorageError;

/// One line of `events.jsonl`, also the web API's event shape
#[derive(Serialize, Deserialize)]
pub(crate) struct JsonEvent {
    timestamp: u64,
    event_type: u32,
    handler_duration_ns: u32,
    goroutine: u64,
    parent_goroutine: u64,
    attributes: [u64; ATTRIBUTE_COUNT],
}

impl From<&GoRuntimeEvent> for JsonEvent {
    fn from(e: &GoRuntimeEvent) -> Self {
        Self {
            timestamp: e.timestamp_ns,
            event_type: e.event_type,
            handler_duration_ns: e.handler_duration_ns,
            goroutine: e.goroutine,
            parent_goroutine: e.parent_goroutine,
            attributes: e.attributes,
        }
    }
}

impl From<JsonEvent> for GoRuntimeEvent {
    fn from(e: JsonEvent) -> Self {
        Self {
            timestamp_ns: e.timestamp,
            event_type: e.event_type,
            handler_duration_ns: e.handler_duration_ns,
            goroutine: e.goroutine,
            parent_goroutine: e.parent_goroutine,
            attributes: e.attributes,
        }
    }
}

struct Inner {
    writer: Option<BufWriter<File>>,
    session: Session,
}

pub struct JsonlStore {
    session_dir: PathBuf,
    events_path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonlStore {
    /// Create (or append to) `events.jsonl` in `session_dir`
    ///
    /// # Errors
    /// Directory or file creation failures
    pub fn create(session_dir: &Path, session: Session) -> Result<Self, StorageError> {
        std::fs::create_dir_all(session_dir)?;
        let events_path = session_dir.join(StorageFormat::Jsonl.file_name());
        let file = OpenOptions::new().create(true).append(true).open(&events_path)?;

        Ok(Self {
            session_dir: session_dir.to_path_buf(),
            events_path,
            inner: Mutex::new(Inner { writer: Some(BufWriter::new(file)), session }),
        })
    }

    /// Open an existing session read-only
    ///
    /// # Errors
    /// Missing events file or unreadable metadata
    pub fn open(session_dir: &Path) -> Result<Self, StorageError> {
        let events_path = session_dir.join(StorageFormat::Jsonl.file_name());
        if !events_path.is_file() {
            return Err(StorageError::NoEventStore(session_dir.display().to_string()));
        }
        let session = load_metadata(session_dir)?;

        Ok(Self {
            session_dir: session_dir.to_path_buf(),
            events_path,
            inner: Mutex::new(Inner { writer: None, session }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn records(&self) -> Result<impl Iterator<Item = Result<GoRuntimeEvent, StorageError>>, StorageError> {
        if let Some(writer) = self.lock().writer.as_mut() {
            writer.flush()?;
        }
        let reader = BufReader::new(File::open(&self.events_path)?);

        Ok(reader.lines().filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str::<JsonEvent>(&line)
                    .map(GoRuntimeEvent::from)
                    .map_err(StorageError::from),
            ),
            Err(e) => Some(Err(e.into())),
        }))
    }
}

impl EventStore for JsonlStore {
    fn write_event(&self, event: &GoRuntimeEvent) -> Result<(), StorageError> {
        self.write_batch(std::slice::from_ref(event))
    }

    fn write_batch(&self, events: &[GoRuntimeEvent]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let Inner { writer, session } = &mut *inner;
        let writer = writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only"))?;
        for event in events {
            serde_json::to_writer(&mut *writer, &JsonEvent::from(event))?;
            writer.write_all(b"\n")?;
            session.event_count += 1;
        }
        // Lines stay tail-able while recording
        writer.flush()?;
        Ok(())
    }

    fn read_events(&self, filter: &EventFilter) -> Result<Vec<GoRuntimeEvent>, StorageError> {
        filter.collect(self.records()?)
    }

    fn goroutines(&self) -> Result<Vec<u64>, StorageError> {
        let mut ids = BTreeSet::new();
        for event in self.records()? {
            ids.insert(event?.goroutine);
        }
        Ok(ids.into_iter().collect())
    }

    fn session(&self) -> Session {
        self.lock().session.clone()
    }

    fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.session = session.clone();
        save_metadata(&self.session_dir, session)
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(writer) = self.lock().writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgotop_common::EventType;

    #[test]
    fn test_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::create(dir.path(), Session::new(Some(7), "app")).unwrap();
        let event = GoRuntimeEvent::stamped(EventType::GoroutineCreated, 100, 150, 2, 1, [1, 2, 0, 0, 0]);
        store.write_event(&event).unwrap();

        let text = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["event_type"], 4);
        assert_eq!(value["goroutine"], 2);
        assert_eq!(value["attributes"], serde_json::json!([1, 2, 0, 0, 0]));
        assert_eq!(store.session().event_count, 1);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::create(dir.path(), Session::new(None, "app")).unwrap();
        let event = GoRuntimeEvent::stamped(EventType::StatusChange, 1, 1, 3, 1, [1, 2, 3, 0, 0]);
        store.write_event(&event).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("events.jsonl"))
            .unwrap()
            .write_all(b"\n\n")
            .unwrap();

        assert_eq!(store.read_events(&EventFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_open_requires_events_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(JsonlStore::open(dir.path()), Err(StorageError::NoEventStore(_))));
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(None, "app");
        save_metadata(dir.path(), &session).unwrap();
        drop(JsonlStore::create(dir.path(), session).unwrap());

        let store = JsonlStore::open(dir.path()).unwrap();
        let event = GoRuntimeEvent::stamped(EventType::StatusChange, 1, 1, 3, 1, [0; 5]);
        assert!(matches!(store.write_event(&event), Err(StorageError::Io(_))));
    }
}
