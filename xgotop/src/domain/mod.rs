//! Domain model for xgotop
//!
//! Core domain types and errors:
//! - Newtypes for ids that are easy to mix up (process vs goroutine)
//! - Structured error enums per subsystem

pub mod errors;
pub mod types;

pub use types::{GoroutineId, Pid};

pub use errors::{SamplingError, StorageError, TracerError};
