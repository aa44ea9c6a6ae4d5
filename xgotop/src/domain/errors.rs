//! Structured error types for xgotop
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to attach {probe} to {binary}: {error}")]
    ProbeAttachFailed { probe: String, binary: String, error: String },

    #[error("{binary} is missing Go runtime symbols: {}", symbols.join(", "))]
    MissingRuntimeSymbols { binary: String, symbols: Vec<&'static str> },

    #[error("Unsupported target architecture {0} (expected aarch64 or x86_64)")]
    UnsupportedArchitecture(String),

    #[error("eBPF map {0} not found")]
    MapNotFound(&'static str),

    #[error("eBPF program {0} not found")]
    ProgramNotFound(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aya(#[from] aya::EbpfError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("unknown storage format: {0} (supported: jsonl, binary, sqlite)")]
    UnknownFormat(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("no event store found for session {0}")]
    NoEventStore(String),

    #[error("invalid magic number: {0:#x}")]
    InvalidMagic(u32),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("truncated record at offset {0}")]
    TruncatedRecord(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("invalid sampling rate format: {0}")]
    InvalidFormat(String),

    #[error("unknown event name: {0}")]
    UnknownEvent(String),

    #[error("invalid rate for {name}: {reason}")]
    InvalidRate { name: String, reason: String },

    #[error("sampling rate must be between 0 and 1, got {0}")]
    OutOfRange(f64),
}
