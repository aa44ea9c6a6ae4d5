//! # Capture Engine
//!
//! One handler per instrumented Go runtime entry point. Each handler:
//!
//! 1. asks the sampling controller whether to proceed,
//! 2. reads goroutine/type state from the traced process,
//! 3. consults or updates the correlation tables,
//! 4. emits zero, one or two [`GoRuntimeEvent`]s into the delivery channel.
//!
//! ## Goroutine creation (two hops)
//!
//! `newproc1` runs before the new goroutine has been scheduled and its return
//! cannot be probed, so it only records `new_goid → caller_goid` in the
//! creation table. The first `casgstatus` of the new goroutine finds that
//! entry, emits [`EventType::GoroutineCreated`] and deletes it.
//!
//! ## Goroutine exit (two hops)
//!
//! `goexit1` records `goid → exit_begin_ns` in the exit table. The
//! `casgstatus(.., _Gdead)` that follows emits the status change and
//! [`EventType::GoroutineExited`], then deletes the entry.
//!
//! ## Failure policy
//!
//! Handlers never retry and never block. Any failure aborts the invocation
//! with a [`CaptureError`] and nothing emitted; the probe wrapper logs it.
//! Paired emissions reserve both slots before writing either, so a full
//! channel never produces half a pair.

use crate::layout::G_DEAD;
use crate::reader::{read_goroutine, read_map_type, read_type, Goroutine, TargetMemory};
use crate::sampling::{admit, SamplingConfig};
use crate::{EventType, GoRuntimeEvent, ATTRIBUTE_COUNT};

// ============================================================================
// Environment
// ============================================================================

/// Bounded key → value table shared by all CPUs.
///
/// Implementations serialize concurrent access internally and evict the
/// least recently used entry when full.
pub trait CorrelationTable {
    fn get(&self, key: u64) -> Option<u64>;

    /// Insert or overwrite
    fn put(&self, key: u64, value: u64) -> Result<(), i64>;

    /// Remove if present. A missing key (already evicted) is not an error.
    fn delete(&self, key: u64);
}

/// Space for one record reserved in the delivery channel
pub trait EventSlot {
    /// Write `event` into the slot and make it visible to the consumer
    fn submit(self, event: GoRuntimeEvent);

    /// Give the slot back without publishing anything
    fn discard(self);
}

/// Bounded multi-producer/single-consumer output channel
pub trait EventChannel {
    type Slot: EventSlot;

    /// `None` when the channel is full
    fn reserve(&self) -> Option<Self::Slot>;
}

/// Monotonic nanosecond clock
pub trait Clock {
    fn now_ns(&self) -> u64;
}

/// Everything a handler can touch
pub trait Environment: TargetMemory + SamplingConfig + Clock {
    type Table: CorrelationTable;
    type Channel: EventChannel;

    /// In-progress creations: `new_goid → caller_goid`
    fn creations(&self) -> &Self::Table;

    /// Exiting goroutines: `goid → exit_begin_ns`
    fn exits(&self) -> &Self::Table;

    fn channel(&self) -> &Self::Channel;
}

// ============================================================================
// Results
// ============================================================================

/// What a successful handler invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Dropped by the sampling controller
    NotSampled,
    /// Number of records submitted
    Emitted(u8),
    /// A correlation entry was stored, nothing emitted
    Recorded,
}

/// Reasons a handler invocation was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// The `g` of the subject or current goroutine could not be read
    ReadGoroutine(i64),
    /// The caller `g` passed to `newproc1` could not be read
    ReadCallerGoroutine(i64),
    ReadType(i64),
    ReadMapType(i64),
    ReadKeyType(i64),
    ReadElemType(i64),
    /// Ring buffer reservation failed; the event is dropped
    ChannelFull,
    /// Correlation table insert failed
    CorrelationUpdate(i64),
}

impl CaptureError {
    /// Helper return code, 0 when not applicable
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ReadGoroutine(c)
            | Self::ReadCallerGoroutine(c)
            | Self::ReadType(c)
            | Self::ReadMapType(c)
            | Self::ReadKeyType(c)
            | Self::ReadElemType(c)
            | Self::CorrelationUpdate(c) => c,
            Self::ChannelFull => 0,
        }
    }
}

// ============================================================================
// Emission
// ============================================================================

type Attributes = [u64; ATTRIBUTE_COUNT];

#[inline(always)]
fn emit<E: Environment>(
    env: &E,
    start_ns: u64,
    g: Goroutine,
    event_type: EventType,
    attributes: Attributes,
) -> Result<(), CaptureError> {
    let slot = env.channel().reserve().ok_or(CaptureError::ChannelFull)?;
    slot.submit(GoRuntimeEvent::stamped(
        event_type,
        start_ns,
        env.now_ns(),
        g.id,
        g.parent_id,
        attributes,
    ));
    Ok(())
}

/// Emit two records in order, or neither
#[inline(always)]
fn emit_pair<E: Environment>(
    env: &E,
    start_ns: u64,
    g: Goroutine,
    first: (EventType, Attributes),
    second: (EventType, Attributes),
) -> Result<(), CaptureError> {
    let first_slot = env.channel().reserve().ok_or(CaptureError::ChannelFull)?;
    let Some(second_slot) = env.channel().reserve() else {
        first_slot.discard();
        return Err(CaptureError::ChannelFull);
    };

    let now = env.now_ns();
    first_slot.submit(GoRuntimeEvent::stamped(first.0, start_ns, now, g.id, g.parent_id, first.1));
    let now = env.now_ns();
    second_slot
        .submit(GoRuntimeEvent::stamped(second.0, start_ns, now, g.id, g.parent_id, second.1));
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// `runtime.casgstatus(gp *g, oldval, newval uint32)`
///
/// # Errors
/// [`CaptureError::ReadGoroutine`] if `gp` is unreadable,
/// [`CaptureError::ChannelFull`] if the ring buffer has no room.
#[inline(always)]
pub fn on_status_change<E: Environment>(
    env: &E,
    gp: u64,
    old_status: u32,
    new_status: u32,
) -> Result<Outcome, CaptureError> {
    if !admit(env, EventType::StatusChange) {
        return Ok(Outcome::NotSampled);
    }
    let start_ns = env.now_ns();

    let subject = read_goroutine(env, gp).map_err(CaptureError::ReadGoroutine)?;
    let status = [u64::from(old_status), u64::from(new_status), subject.id, 0, 0];

    if new_status == G_DEAD {
        if let Some(exit_begin_ns) = env.exits().get(subject.id) {
            emit_pair(
                env,
                start_ns,
                subject,
                (EventType::StatusChange, status),
                (EventType::GoroutineExited, [subject.id, exit_begin_ns, 0, 0, 0]),
            )?;
            env.exits().delete(subject.id);
            return Ok(Outcome::Emitted(2));
        }
    }

    if let Some(caller_goid) = env.creations().get(subject.id) {
        emit_pair(
            env,
            start_ns,
            subject,
            (EventType::GoroutineCreated, [caller_goid, subject.id, 0, 0, 0]),
            (EventType::StatusChange, status),
        )?;
        env.creations().delete(subject.id);
        return Ok(Outcome::Emitted(2));
    }

    emit(env, start_ns, subject, EventType::StatusChange, status)?;
    Ok(Outcome::Emitted(1))
}

/// `runtime.newobject(typ *_type) unsafe.Pointer`
///
/// # Errors
/// Read failures or a full channel.
#[inline(always)]
pub fn on_new_object<E: Environment>(
    env: &E,
    current_g: u64,
    typ: u64,
) -> Result<Outcome, CaptureError> {
    if !admit(env, EventType::AllocateObject) {
        return Ok(Outcome::NotSampled);
    }
    let start_ns = env.now_ns();

    let g = read_goroutine(env, current_g).map_err(CaptureError::ReadGoroutine)?;
    let ty = read_type(env, typ).map_err(CaptureError::ReadType)?;

    emit(env, start_ns, g, EventType::AllocateObject, [ty.size, u64::from(ty.kind), 0, 0, 0])?;
    Ok(Outcome::Emitted(1))
}

/// `runtime.makeslice(et *_type, len, cap int) unsafe.Pointer`
///
/// # Errors
/// Read failures or a full channel.
#[inline(always)]
pub fn on_make_slice<E: Environment>(
    env: &E,
    current_g: u64,
    elem_type: u64,
    len: u64,
    cap: u64,
) -> Result<Outcome, CaptureError> {
    if !admit(env, EventType::AllocateSlice) {
        return Ok(Outcome::NotSampled);
    }
    let start_ns = env.now_ns();

    let g = read_goroutine(env, current_g).map_err(CaptureError::ReadGoroutine)?;
    let elem = read_type(env, elem_type).map_err(CaptureError::ReadType)?;

    emit(env, start_ns, g, EventType::AllocateSlice, [elem.size, u64::from(elem.kind), len, cap, 0])?;
    Ok(Outcome::Emitted(1))
}

/// `runtime.makemap(t *abi.MapType, hint int, m *maps.Map) *maps.Map`
///
/// # Errors
/// Read failures at any of the three stages, or a full channel.
#[inline(always)]
pub fn on_make_map<E: Environment>(
    env: &E,
    current_g: u64,
    map_type: u64,
    hint: u64,
) -> Result<Outcome, CaptureError> {
    if !admit(env, EventType::AllocateMap) {
        return Ok(Outcome::NotSampled);
    }
    let start_ns = env.now_ns();

    let g = read_goroutine(env, current_g).map_err(CaptureError::ReadGoroutine)?;
    let map = read_map_type(env, map_type)?;

    emit(
        env,
        start_ns,
        g,
        EventType::AllocateMap,
        [
            map.key.size,
            u64::from(map.key.kind),
            map.elem.size,
            u64::from(map.elem.kind),
            hint,
        ],
    )?;
    Ok(Outcome::Emitted(1))
}

/// `runtime.newproc1(fn *funcval, callergp *g, ...) *g`
///
/// The caller comes from the `callergp` argument; the new goroutine's id is
/// read through the ambient goroutine register.
///
/// # Errors
/// Read failures or a failed correlation insert.
#[inline(always)]
pub fn on_new_goroutine<E: Environment>(
    env: &E,
    current_g: u64,
    caller_gp: u64,
) -> Result<Outcome, CaptureError> {
    if !admit(env, EventType::GoroutineCreated) {
        return Ok(Outcome::NotSampled);
    }

    let caller = read_goroutine(env, caller_gp).map_err(CaptureError::ReadCallerGoroutine)?;
    let new_g = read_goroutine(env, current_g).map_err(CaptureError::ReadGoroutine)?;

    env.creations().put(new_g.id, caller.id).map_err(CaptureError::CorrelationUpdate)?;
    Ok(Outcome::Recorded)
}

/// `runtime.goexit1()`
///
/// # Errors
/// Read failure or a failed correlation insert.
#[inline(always)]
pub fn on_goroutine_exit<E: Environment>(
    env: &E,
    current_g: u64,
) -> Result<Outcome, CaptureError> {
    if !admit(env, EventType::GoroutineExited) {
        return Ok(Outcome::NotSampled);
    }

    let g = read_goroutine(env, current_g).map_err(CaptureError::ReadGoroutine)?;
    let exit_begin_ns = env.now_ns();

    env.exits().put(g.id, exit_begin_ns).map_err(CaptureError::CorrelationUpdate)?;
    Ok(Outcome::Recorded)
}
