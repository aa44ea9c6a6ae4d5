//! # Shared Data Structures and Capture Engine (eBPF ↔ Userspace)
//!
//! Defines the event record shared between the kernel-side uprobe programs and
//! userspace, plus the capture engine those programs run. All shared types use
//! `#[repr(C)]` for a consistent memory layout across the kernel/userspace
//! boundary.
//!
//! ## Instrumented Go Runtime Entry Points
//!
//! | Symbol               | Event                         |
//! |----------------------|-------------------------------|
//! | `runtime.casgstatus` | [`EventType::StatusChange`]   |
//! | `runtime.makeslice`  | [`EventType::AllocateSlice`]  |
//! | `runtime.makemap`    | [`EventType::AllocateMap`]    |
//! | `runtime.newobject`  | [`EventType::AllocateObject`] |
//! | `runtime.newproc1`   | (correlation only)            |
//! | `runtime.goexit1`    | (correlation only)            |
//!
//! ## Key Types
//!
//! - [`GoRuntimeEvent`] - Fixed-size record passed via ring buffer
//! - [`EventType`] - Record discriminator
//! - [`engine`] - One handler per runtime entry point, generic over its
//!   environment so the same code runs inside eBPF and in host tests

#![cfg_attr(not(test), no_std)]

pub mod engine;
pub mod layout;
pub mod reader;
pub mod sampling;

#[cfg(test)]
mod testing;

// ============================================================================
// Event Types
// ============================================================================

/// Discriminator of a [`GoRuntimeEvent`].
///
/// The numeric values are part of the wire format and are also the keys of
/// the `SAMPLING_RATES` map.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// `attributes = [old_status, new_status, subject_goid, 0, 0]`
    StatusChange = 0,
    /// `attributes = [elem_size, elem_kind, len, cap, 0]`
    AllocateSlice = 1,
    /// `attributes = [key_size, key_kind, elem_size, elem_kind, hint]`
    AllocateMap = 2,
    /// `attributes = [size, kind, 0, 0, 0]`
    AllocateObject = 3,
    /// `attributes = [caller_goid, new_goid, 0, 0, 0]`
    GoroutineCreated = 4,
    /// `attributes = [goid, exit_begin_ns, 0, 0, 0]`
    GoroutineExited = 5,
}

impl EventType {
    /// All event types in discriminant order
    pub const ALL: [EventType; 6] = [
        EventType::StatusChange,
        EventType::AllocateSlice,
        EventType::AllocateMap,
        EventType::AllocateObject,
        EventType::GoroutineCreated,
        EventType::GoroutineExited,
    ];

    /// Decode a raw discriminant
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::StatusChange),
            1 => Some(Self::AllocateSlice),
            2 => Some(Self::AllocateMap),
            3 => Some(Self::AllocateObject),
            4 => Some(Self::GoroutineCreated),
            5 => Some(Self::GoroutineExited),
            _ => None,
        }
    }

    /// Operator-facing short name, used by `--sample` and display
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StatusChange => "casgstatus",
            Self::AllocateSlice => "makeslice",
            Self::AllocateMap => "makemap",
            Self::AllocateObject => "newobject",
            Self::GoroutineCreated => "newgoroutine",
            Self::GoroutineExited => "goexit",
        }
    }

    /// Inverse of [`EventType::name`]
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

/// Number of 64-bit attribute slots carried by every event
pub const ATTRIBUTE_COUNT: usize = 5;

// ============================================================================
// Capture Statistics (keys of the `CAPTURE_STATS` map)
// ============================================================================

/// Records dropped because the ring buffer had no room
pub const STAT_CHANNEL_FULL: u32 = 0;

/// Invocations abandoned on an unreadable `g` or type descriptor
pub const STAT_READ_FAILED: u32 = 1;

/// Failed inserts into a correlation table
pub const STAT_CORRELATION_FAILED: u32 = 2;

/// Capacity of the `CAPTURE_STATS` map
pub const STAT_COUNT: u32 = 3;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event sent from eBPF to userspace via ring buffer
///
/// Self-contained: carries no pointers into the traced process, whose memory
/// may be gone by the time userspace reads the record.
///
/// **Memory Layout**: `#[repr(C)]`, 72 bytes, no implicit padding
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GoRuntimeEvent {
    /// Capture time in nanoseconds (`bpf_ktime_get_ns()`, CLOCK_MONOTONIC)
    pub timestamp_ns: u64,

    /// Raw [`EventType`] discriminant
    pub event_type: u32,

    /// Time spent inside the handler, saturated to `u32::MAX`
    pub handler_duration_ns: u32,

    /// Goroutine the event is about
    pub goroutine: u64,

    /// Parent of [`Self::goroutine`] (0 if none)
    pub parent_goroutine: u64,

    /// Per-type payload, see [`EventType`]
    pub attributes: [u64; ATTRIBUTE_COUNT],
}

impl GoRuntimeEvent {
    /// Record size on the wire
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Build a record stamped at `now_ns` for a handler entered at `start_ns`
    #[must_use]
    pub fn stamped(
        event_type: EventType,
        start_ns: u64,
        now_ns: u64,
        goroutine: u64,
        parent_goroutine: u64,
        attributes: [u64; ATTRIBUTE_COUNT],
    ) -> Self {
        let elapsed = now_ns.saturating_sub(start_ns);
        Self {
            timestamp_ns: now_ns,
            event_type: event_type as u32,
            handler_duration_ns: u32::try_from(elapsed).unwrap_or(u32::MAX),
            goroutine,
            parent_goroutine,
            attributes,
        }
    }

    /// Decoded event type, `None` for unknown discriminants
    #[must_use]
    pub const fn kind(&self) -> Option<EventType> {
        EventType::from_raw(self.event_type)
    }

    /// Decode a little-endian record, `None` if `bytes` is too short
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u64_at = |off: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(buf)
        };
        let u32_at = |off: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[off..off + 4]);
            u32::from_le_bytes(buf)
        };

        let mut attributes = [0u64; ATTRIBUTE_COUNT];
        for (i, slot) in attributes.iter_mut().enumerate() {
            *slot = u64_at(32 + i * 8);
        }

        Some(Self {
            timestamp_ns: u64_at(0),
            event_type: u32_at(8),
            handler_duration_ns: u32_at(12),
            goroutine: u64_at(16),
            parent_goroutine: u64_at(24),
            attributes,
        })
    }

    /// Encode as a little-endian record
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[8..12].copy_from_slice(&self.event_type.to_le_bytes());
        out[12..16].copy_from_slice(&self.handler_duration_ns.to_le_bytes());
        out[16..24].copy_from_slice(&self.goroutine.to_le_bytes());
        out[24..32].copy_from_slice(&self.parent_goroutine.to_le_bytes());
        for (i, attr) in self.attributes.iter().enumerate() {
            out[32 + i * 8..40 + i * 8].copy_from_slice(&attr.to_le_bytes());
        }
        out
    }
}

#[cfg(feature = "user")]
use aya::Pod;

// Pod lets userspace read the record straight out of aya maps
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for GoRuntimeEvent {}
