//! Go runtime memory layout (Go 1.25)
//!
//! Every fixed offset into the traced process lives here. A runtime version
//! that moves these fields needs only this module updated.
//!
//! Offsets come from `runtime/runtime2.go` (`g`) and `internal/abi/type.go`
//! (`Type`, `MapType`).

// ============================================================================
// runtime.g
// ============================================================================

/// `g.goid`
pub const G_GOID_OFFSET: u64 = 152;

/// `g.parentGoid`
pub const G_PARENT_GOID_OFFSET: u64 = 272;

// ============================================================================
// internal/abi.Type and abi.MapType
// ============================================================================

/// `Type.Size_` (uintptr)
pub const TYPE_SIZE_OFFSET: u64 = 0;

/// `Type.Kind_` (uint8)
pub const TYPE_KIND_OFFSET: u64 = 23;

/// `MapType.Key` (*Type)
pub const MAP_TYPE_KEY_OFFSET: u64 = 48;

/// `MapType.Elem` (*Type)
pub const MAP_TYPE_ELEM_OFFSET: u64 = 56;

/// Bits of `Type.Kind_` that carry the kind itself
pub const KIND_MASK: u8 = 0x1f;

// ============================================================================
// Goroutine statuses (runtime2.go)
// ============================================================================

pub const G_IDLE: u32 = 0;
pub const G_RUNNABLE: u32 = 1;
pub const G_RUNNING: u32 = 2;
pub const G_SYSCALL: u32 = 3;
pub const G_WAITING: u32 = 4;
/// Terminal status: the goroutine finished and its `g` is on a free list
pub const G_DEAD: u32 = 6;
pub const G_COPYSTACK: u32 = 8;
pub const G_PREEMPTED: u32 = 9;
/// Set while the GC scans a goroutine's stack, ORed with another status
pub const G_SCAN: u32 = 0x1000;

/// Human-readable goroutine status (ignores the `_Gscan` bit's combination
/// with unknown statuses)
#[must_use]
pub const fn status_name(status: u32) -> &'static str {
    let scan = status & G_SCAN != 0;
    match (status & !G_SCAN, scan) {
        (G_IDLE, false) => "idle",
        (G_RUNNABLE, false) => "runnable",
        (G_RUNNING, false) => "running",
        (G_SYSCALL, false) => "syscall",
        (G_WAITING, false) => "waiting",
        (G_DEAD, false) => "dead",
        (G_COPYSTACK, false) => "copystack",
        (G_PREEMPTED, false) => "preempted",
        (G_RUNNABLE, true) => "scan+runnable",
        (G_RUNNING, true) => "scan+running",
        (G_SYSCALL, true) => "scan+syscall",
        (G_WAITING, true) => "scan+waiting",
        (G_PREEMPTED, true) => "scan+preempted",
        _ => "unknown",
    }
}

// ============================================================================
// abi.Kind
// ============================================================================

/// Go type kind, as stored (masked) in `Type.Kind_`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Invalid = 0,
    Bool = 1,
    Int = 2,
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Uint = 7,
    Uint8 = 8,
    Uint16 = 9,
    Uint32 = 10,
    Uint64 = 11,
    Uintptr = 12,
    Float32 = 13,
    Float64 = 14,
    Complex64 = 15,
    Complex128 = 16,
    Array = 17,
    Chan = 18,
    Func = 19,
    Interface = 20,
    Map = 21,
    Pointer = 22,
    Slice = 23,
    String = 24,
    Struct = 25,
    UnsafePointer = 26,
}

impl Kind {
    /// Decode a raw `Kind_` byte (flag bits are masked off)
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let masked = (raw as u8) & KIND_MASK;
        Some(match masked {
            0 => Self::Invalid,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Int8,
            4 => Self::Int16,
            5 => Self::Int32,
            6 => Self::Int64,
            7 => Self::Uint,
            8 => Self::Uint8,
            9 => Self::Uint16,
            10 => Self::Uint32,
            11 => Self::Uint64,
            12 => Self::Uintptr,
            13 => Self::Float32,
            14 => Self::Float64,
            15 => Self::Complex64,
            16 => Self::Complex128,
            17 => Self::Array,
            18 => Self::Chan,
            19 => Self::Func,
            20 => Self::Interface,
            21 => Self::Map,
            22 => Self::Pointer,
            23 => Self::Slice,
            24 => Self::String,
            25 => Self::Struct,
            26 => Self::UnsafePointer,
            _ => return None,
        })
    }

    /// Go spelling of the kind
    #[must_use]
    pub const fn go_name(self) -> &'static str {
        match self {
            Self::Invalid => "INVALID",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint => "uint",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Uintptr => "uintptr",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
            Self::Array => "[N]T",
            Self::Chan => "chan T",
            Self::Func => "func",
            Self::Interface => "interface{}",
            Self::Map => "map[K]V",
            Self::Pointer => "*T",
            Self::Slice => "[]T",
            Self::String => "string",
            Self::Struct => "struct{}",
            Self::UnsafePointer => "unsafe.Pointer",
        }
    }
}
