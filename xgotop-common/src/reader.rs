//! Goroutine identity and type descriptor readers
//!
//! Narrow adapter between the capture engine and the traced process's memory.
//! Every read goes through [`TargetMemory`], whose eBPF implementation uses
//! `bpf_probe_read_user`; a failed read becomes a typed [`CaptureError`].

use crate::engine::CaptureError;
use crate::layout::{
    G_GOID_OFFSET, G_PARENT_GOID_OFFSET, MAP_TYPE_ELEM_OFFSET, MAP_TYPE_KEY_OFFSET,
    TYPE_KIND_OFFSET, TYPE_SIZE_OFFSET,
};

/// Verified reads from the traced process
///
/// Errors carry the helper's negative return code.
pub trait TargetMemory {
    fn read_u64(&self, addr: u64) -> Result<u64, i64>;
    fn read_u8(&self, addr: u64) -> Result<u8, i64>;
}

/// Identity of a goroutine, read from its `runtime.g`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Goroutine {
    pub id: u64,
    pub parent_id: u64,
}

/// Size and raw kind byte of an `abi.Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeInfo {
    pub size: u64,
    pub kind: u8,
}

/// Key and element types of an `abi.MapType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapTypeInfo {
    pub key: TypeInfo,
    pub elem: TypeInfo,
}

/// Read the identity record of the `g` at `g_addr`
#[inline(always)]
pub fn read_goroutine<M: TargetMemory>(mem: &M, g_addr: u64) -> Result<Goroutine, i64> {
    if g_addr == 0 {
        return Err(-14); // EFAULT
    }
    let id = mem.read_u64(g_addr + G_GOID_OFFSET)?;
    let parent_id = mem.read_u64(g_addr + G_PARENT_GOID_OFFSET)?;
    Ok(Goroutine { id, parent_id })
}

/// Read size/kind of the `abi.Type` at `type_addr`
#[inline(always)]
pub fn read_type<M: TargetMemory>(mem: &M, type_addr: u64) -> Result<TypeInfo, i64> {
    if type_addr == 0 {
        return Err(-14);
    }
    let size = mem.read_u64(type_addr + TYPE_SIZE_OFFSET)?;
    let kind = mem.read_u8(type_addr + TYPE_KIND_OFFSET)?;
    Ok(TypeInfo { size, kind })
}

/// Two-stage read of an `abi.MapType`: the sub-type pointers first, then
/// each sub-type's descriptor.
#[inline(always)]
pub fn read_map_type<M: TargetMemory>(
    mem: &M,
    map_type_addr: u64,
) -> Result<MapTypeInfo, CaptureError> {
    if map_type_addr == 0 {
        return Err(CaptureError::ReadMapType(-14));
    }
    let key_ptr =
        mem.read_u64(map_type_addr + MAP_TYPE_KEY_OFFSET).map_err(CaptureError::ReadMapType)?;
    let elem_ptr =
        mem.read_u64(map_type_addr + MAP_TYPE_ELEM_OFFSET).map_err(CaptureError::ReadMapType)?;
    let key = read_type(mem, key_ptr).map_err(CaptureError::ReadKeyType)?;
    let elem = read_type(mem, elem_ptr).map_err(CaptureError::ReadElemType)?;
    Ok(MapTypeInfo { key, elem })
}
