//! Binary event store (`events.bin`)
//!
//! ```text
//! offset 0   u32 LE  magic   0x474F5452 ("GOTR")
//! offset 4   u32 LE  version 1
//! offset 8   72-byte records, GoRuntimeEvent::to_bytes()
//! ```
//!
//! The record layout is the kernel wire format, so a recording can be
//! decoded with the same code that decodes the ring buffer.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use xgotop_common::GoRuntimeEvent;

use super::{load_metadata, save_metadata, EventFilter, EventStore, Session, StorageFormat};
use crate::domain::StorageError;

/// "GOTR" (Go Trace)
pub const MAGIC: u32 = 0x474F_5452;
pub const VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

struct Inner {
    writer: Option<BufWriter<File>>,
    session: Session,
}

pub struct BinaryStore {
    session_dir: PathBuf,
    events_path: PathBuf,
    inner: Mutex<Inner>,
}

impl BinaryStore {
    /// Create (or append to) `events.bin` in `session_dir`
    ///
    /// # Errors
    /// Directory or file creation failures
    pub fn create(session_dir: &Path, session: Session) -> Result<Self, StorageError> {
        std::fs::create_dir_all(session_dir)?;
        let events_path = session_dir.join(StorageFormat::Binary.file_name());
        let file = OpenOptions::new().create(true).append(true).open(&events_path)?;

        let mut writer = BufWriter::new(file);
        if writer.get_ref().metadata()?.len() == 0 {
            writer.write_all(&MAGIC.to_le_bytes())?;
            writer.write_all(&VERSION.to_le_bytes())?;
            writer.flush()?;
        }

        Ok(Self {
            session_dir: session_dir.to_path_buf(),
            events_path,
            inner: Mutex::new(Inner { writer: Some(writer), session }),
        })
    }

    /// Open an existing session read-only
    ///
    /// # Errors
    /// Missing files, bad header, or unreadable metadata
    pub fn open(session_dir: &Path) -> Result<Self, StorageError> {
        let events_path = session_dir.join(StorageFormat::Binary.file_name());
        read_header(&mut File::open(&events_path)?)?;
        let session = load_metadata(session_dir)?;

        Ok(Self {
            session_dir: session_dir.to_path_buf(),
            events_path,
            inner: Mutex::new(Inner { writer: None, session }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn records(&self) -> Result<Records<BufReader<File>>, StorageError> {
        if let Some(writer) = self.lock().writer.as_mut() {
            writer.flush()?;
        }
        let mut reader = BufReader::new(File::open(&self.events_path)?);
        read_header(&mut reader)?;
        Ok(Records { reader, offset: HEADER_LEN })
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<(), StorageError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    let magic = u32::from_le_bytes(buf);
    if magic != MAGIC {
        return Err(StorageError::InvalidMagic(magic));
    }
    reader.read_exact(&mut buf)?;
    let version = u32::from_le_bytes(buf);
    if version != VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Streaming decoder over fixed-size records
struct Records<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> Iterator for Records<R> {
    type Item = Result<GoRuntimeEvent, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; GoRuntimeEvent::SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(e.into())),
            }
        }

        match filled {
            0 => None,
            n if n < buf.len() => Some(Err(StorageError::TruncatedRecord(self.offset))),
            _ => {
                self.offset += GoRuntimeEvent::SIZE as u64;
                GoRuntimeEvent::from_bytes(&buf).map(Ok)
            }
        }
    }
}

impl EventStore for BinaryStore {
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
            writer.write_all(&event.to_bytes())?;
            session.event_count += 1;
        }
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
    fn test_header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(None, "app");
        drop(BinaryStore::create(dir.path(), session.clone()).unwrap());
        drop(BinaryStore::create(dir.path(), session).unwrap());

        let bytes = std::fs::read(dir.path().join("events.bin")).unwrap();
        assert_eq!(bytes, [0x52, 0x54, 0x4F, 0x47, 1, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("events.bin"), [0u8; 8]).unwrap();
        assert!(matches!(BinaryStore::open(dir.path()), Err(StorageError::InvalidMagic(0))));
    }

    #[test]
    fn test_truncated_tail_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = BinaryStore::create(dir.path(), Session::new(None, "app")).unwrap();
        let event = GoRuntimeEvent::stamped(EventType::AllocateObject, 1, 2, 3, 1, [16, 25, 0, 0, 0]);
        store.write_event(&event).unwrap();
        store.flush().unwrap();

        let mut file = OpenOptions::new().append(true).open(dir.path().join("events.bin")).unwrap();
        file.write_all(&[0u8; 10]).unwrap();

        let offset = HEADER_LEN + GoRuntimeEvent::SIZE as u64;
        assert!(matches!(
            store.read_events(&EventFilter::default()),
            Err(StorageError::TruncatedRecord(o)) if o == offset
        ));
    }
}
