//! # Session Storage
//!
//! Persists captured events per recording session so they can be listed and
//! replayed later.
//!
//! ## Layout
//!
//! ```text
//! <storage-dir>/
//! └── <session-id>/
//!     ├── metadata.json       Session
//!     └── events.jsonl | events.bin | events.db
//! ```
//!
//! ## Formats
//!
//! - [`jsonl`]: one JSON object per line, human-greppable
//! - [`binary`]: `GOTR` header + fixed 72-byte little-endian records
//! - [`sqlite`]: indexed table, for paging through large sessions
//!
//! [`SessionManager`] picks the format on create and detects it on open.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use xgotop_common::{EventType, GoRuntimeEvent};

use crate::domain::StorageError;

pub mod binary;
pub mod jsonl;
pub mod manager;
pub mod sqlite;

pub use binary::BinaryStore;
pub(crate) use jsonl::JsonEvent;
pub use jsonl::JsonlStore;
pub use manager::SessionManager;
pub use sqlite::SqliteStore;

const METADATA_FILE: &str = "metadata.json";

// =============================================================================
// Session metadata
// =============================================================================

/// One recording session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Unix seconds
    pub started_at: u64,
    /// Unix seconds, unset while recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    pub binary_path: String,
    #[serde(default)]
    pub event_count: u64,
}

impl Session {
    /// Fresh session with a random id, started now
    #[must_use]
    pub fn new(pid: Option<i32>, binary_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: unix_now(),
            ended_at: None,
            pid,
            binary_path: binary_path.into(),
            event_count: 0,
        }
    }

    /// Mark the session finished with `event_count` stored events
    pub fn finish(&mut self, event_count: u64) {
        self.ended_at = Some(unix_now());
        self.event_count = event_count;
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

pub(crate) fn save_metadata(session_dir: &Path, session: &Session) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(session)?;
    fs::write(session_dir.join(METADATA_FILE), data)?;
    Ok(())
}

pub(crate) fn load_metadata(session_dir: &Path) -> Result<Session, StorageError> {
    let data = fs::read(session_dir.join(METADATA_FILE))?;
    Ok(serde_json::from_slice(&data)?)
}

// =============================================================================
// Formats
// =============================================================================

/// On-disk event encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Jsonl,
    Binary,
    Sqlite,
}

impl StorageFormat {
    /// Name of the events file inside a session directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Jsonl => "events.jsonl",
            Self::Binary => "events.bin",
            Self::Sqlite => "events.db",
        }
    }
}

impl FromStr for StorageFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" | "json" => Ok(Self::Jsonl),
            "binary" | "bin" => Ok(Self::Binary),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(StorageError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jsonl => "jsonl",
            Self::Binary => "binary",
            Self::Sqlite => "sqlite",
        })
    }
}

// =============================================================================
// Querying
// =============================================================================

/// Read-side filter. All set conditions must hold.
///
/// `offset` skips matching events; `limit` 0 means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub goroutine: Option<u64>,
    pub event_type: Option<EventType>,
    /// Inclusive lower bound on `timestamp_ns`
    pub start_ns: Option<u64>,
    /// Inclusive upper bound on `timestamp_ns`
    pub end_ns: Option<u64>,
    pub offset: usize,
    pub limit: usize,
}

impl EventFilter {
    #[must_use]
    pub fn matches(&self, event: &GoRuntimeEvent) -> bool {
        self.goroutine.map_or(true, |g| event.goroutine == g)
            && self.event_type.map_or(true, |ty| event.event_type == ty as u32)
            && self.start_ns.map_or(true, |t| event.timestamp_ns >= t)
            && self.end_ns.map_or(true, |t| event.timestamp_ns <= t)
    }

    /// Apply the filter to a stream of decoded events, stopping at the limit
    pub(crate) fn collect<I>(&self, events: I) -> Result<Vec<GoRuntimeEvent>, StorageError>
    where
        I: IntoIterator<Item = Result<GoRuntimeEvent, StorageError>>,
    {
        let mut out = Vec::new();
        let mut skipped = 0;
        for event in events {
            let event = event?;
            if !self.matches(&event) {
                continue;
            }
            if skipped < self.offset {
                skipped += 1;
                continue;
            }
            out.push(event);
            if self.limit > 0 && out.len() >= self.limit {
                break;
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Store trait
// =============================================================================

/// Event persistence for one session
///
/// Implementations are internally synchronised so processing workers can
/// share one store.
pub trait EventStore: Send + Sync {
    /// # Errors
    /// I/O or encoding failures
    fn write_event(&self, event: &GoRuntimeEvent) -> Result<(), StorageError>;

    /// # Errors
    /// I/O or encoding failures
    fn write_batch(&self, events: &[GoRuntimeEvent]) -> Result<(), StorageError>;

    /// # Errors
    /// I/O failures or malformed records
    fn read_events(&self, filter: &EventFilter) -> Result<Vec<GoRuntimeEvent>, StorageError>;

    /// Distinct goroutine ids, ascending
    ///
    /// # Errors
    /// I/O failures or malformed records
    fn goroutines(&self) -> Result<Vec<u64>, StorageError>;

    /// Session metadata, with `event_count` including events written so far
    fn session(&self) -> Session;

    /// Replace and persist session metadata
    ///
    /// # Errors
    /// Failure to write `metadata.json`
    fn update_session(&self, session: &Session) -> Result<(), StorageError>;

    /// # Errors
    /// I/O failures
    fn flush(&self) -> Result<(), StorageError>;
}
