//! SQLite event store (`events.db`)
//!
//! One row per event, indexed by goroutine, timestamp and event type so the
//! web API can page through large sessions without a full scan. Values are
//! stored as the bit pattern of an `i64` (SQLite integers are signed).

// u64 <-> i64 bit casts are the storage encoding
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use xgotop_common::{GoRuntimeEvent, ATTRIBUTE_COUNT};

use super::{load_metadata, save_metadata, EventFilter, EventStore, Session, StorageFormat};
use crate::domain::StorageError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    event_type INTEGER NOT NULL,
    handler_duration_ns INTEGER NOT NULL,
    goroutine INTEGER NOT NULL,
    parent_goroutine INTEGER NOT NULL,
    attr0 INTEGER NOT NULL,
    attr1 INTEGER NOT NULL,
    attr2 INTEGER NOT NULL,
    attr3 INTEGER NOT NULL,
    attr4 INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_goroutine ON events(goroutine);
CREATE INDEX IF NOT EXISTS idx_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_event_type ON events(event_type);
";

const INSERT: &str = "INSERT INTO events (timestamp, event_type, handler_duration_ns, goroutine, \
     parent_goroutine, attr0, attr1, attr2, attr3, attr4) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const SELECT: &str = "SELECT timestamp, event_type, handler_duration_ns, goroutine, parent_goroutine, \
     attr0, attr1, attr2, attr3, attr4 FROM events";

struct Inner {
    conn: Connection,
    session: Session,
}

pub struct SqliteStore {
    session_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl SqliteStore {
    /// Create (or append to) `events.db` in `session_dir`
    ///
    /// # Errors
    /// Directory creation, database open or schema failures
    pub fn create(session_dir: &Path, session: Session) -> Result<Self, StorageError> {
        std::fs::create_dir_all(session_dir)?;
        let conn = Connection::open(session_dir.join(StorageFormat::Sqlite.file_name()))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { session_dir: session_dir.to_path_buf(), inner: Mutex::new(Inner { conn, session }) })
    }

    /// Open an existing session read-only
    ///
    /// # Errors
    /// Missing database or unreadable metadata
    pub fn open(session_dir: &Path) -> Result<Self, StorageError> {
        let path = session_dir.join(StorageFormat::Sqlite.file_name());
        if !path.is_file() {
            return Err(StorageError::NoEventStore(session_dir.display().to_string()));
        }
        let session = load_metadata(session_dir)?;
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        Ok(Self { session_dir: session_dir.to_path_buf(), inner: Mutex::new(Inner { conn, session }) })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert(conn: &Connection, event: &GoRuntimeEvent) -> rusqlite::Result<()> {
    let a = event.attributes.map(|v| v as i64);
    conn.prepare_cached(INSERT)?.execute(params![
        event.timestamp_ns as i64,
        event.event_type,
        event.handler_duration_ns,
        event.goroutine as i64,
        event.parent_goroutine as i64,
        a[0],
        a[1],
        a[2],
        a[3],
        a[4],
    ])?;
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<GoRuntimeEvent> {
    let mut attributes = [0u64; ATTRIBUTE_COUNT];
    for (i, slot) in attributes.iter_mut().enumerate() {
        *slot = row.get::<_, i64>(5 + i)? as u64;
    }
    Ok(GoRuntimeEvent {
        timestamp_ns: row.get::<_, i64>(0)? as u64,
        event_type: row.get(1)?,
        handler_duration_ns: row.get(2)?,
        goroutine: row.get::<_, i64>(3)? as u64,
        parent_goroutine: row.get::<_, i64>(4)? as u64,
        attributes,
    })
}

/// `WHERE` clause and bindings for `filter`, in insertion order
fn filter_query(filter: &EventFilter) -> (String, Vec<i64>) {
    let mut conditions = Vec::new();
    let mut bindings = Vec::new();
    if let Some(g) = filter.goroutine {
        conditions.push("goroutine = ?");
        bindings.push(g as i64);
    }
    if let Some(ty) = filter.event_type {
        conditions.push("event_type = ?");
        bindings.push(i64::from(ty as u32));
    }
    if let Some(t) = filter.start_ns {
        conditions.push("timestamp >= ?");
        bindings.push(t as i64);
    }
    if let Some(t) = filter.end_ns {
        conditions.push("timestamp <= ?");
        bindings.push(t as i64);
    }

    let mut sql = SELECT.to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    // SQLite needs a LIMIT before OFFSET; -1 is unlimited
    sql.push_str(" ORDER BY id LIMIT ? OFFSET ?");
    bindings.push(if filter.limit == 0 { -1 } else { filter.limit as i64 });
    bindings.push(filter.offset as i64);
    (sql, bindings)
}

impl EventStore for SqliteStore {
    fn write_event(&self, event: &GoRuntimeEvent) -> Result<(), StorageError> {
        let mut inner = self.lock();
        insert(&inner.conn, event)?;
        inner.session.event_count += 1;
        Ok(())
    }

    fn write_batch(&self, events: &[GoRuntimeEvent]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let Inner { conn, session } = &mut *inner;
        let tx = conn.transaction()?;
        for event in events {
            insert(&tx, event)?;
        }
        tx.commit()?;
        session.event_count += events.len() as u64;
        Ok(())
    }

    fn read_events(&self, filter: &EventFilter) -> Result<Vec<GoRuntimeEvent>, StorageError> {
        let (sql, bindings) = filter_query(filter);
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(bindings), event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn goroutines(&self) -> Result<Vec<u64>, StorageError> {
        let inner = self.lock();
        let mut stmt = inner.conn.prepare("SELECT DISTINCT goroutine FROM events ORDER BY goroutine")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(|g| g as u64))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
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
        // Every insert is committed on return
        Ok(())
    }
}
