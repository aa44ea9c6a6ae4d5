//! # eBPF Kernel-Side Instrumentation
//!
//! Uprobes on six Go runtime functions. Each program decodes its arguments
//! from registers using the Go internal register ABI, then hands off to the
//! shared capture engine in `xgotop_common::engine`.
//!
//! ## Programs
//!
//! | Program            | Attach point         |
//! |--------------------|----------------------|
//! | `uprobe_casgstatus`| `runtime.casgstatus` |
//! | `uprobe_makeslice` | `runtime.makeslice`  |
//! | `uprobe_makemap`   | `runtime.makemap`    |
//! | `uprobe_newobject` | `runtime.newobject`  |
//! | `uprobe_newproc1`  | `runtime.newproc1`   |
//! | `uprobe_goexit1`   | `runtime.goexit1`    |
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (16MB) carrying [`GoRuntimeEvent`] records
//! - `SAMPLING_RATES` - Event type → admission percentage, written by userspace
//! - `GOROUTINES_IN_CREATION` / `GOROUTINES_IN_EXIT` - LRU correlation tables
//! - `CAPTURE_STATS` - Drop and failure counters
//!
//! ## Build
//!
//! Always compiled in release mode:
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{bpf_get_prandom_u32, bpf_ktime_get_ns, bpf_probe_read_user},
    macros::{map, uprobe},
    maps::{ring_buf::RingBufEntry, HashMap, LruHashMap, RingBuf},
    programs::ProbeContext,
};
use aya_log_ebpf::{error, warn};
use xgotop_common::{
    engine::{
        on_goroutine_exit, on_make_map, on_make_slice, on_new_goroutine, on_new_object,
        on_status_change, CaptureError, Clock, CorrelationTable, Environment, EventChannel,
        EventSlot, Outcome,
    },
    reader::TargetMemory,
    sampling::{SamplingConfig, MAX_SAMPLING_ENTRIES},
    EventType, GoRuntimeEvent, STAT_CHANNEL_FULL, STAT_CORRELATION_FAILED, STAT_COUNT,
    STAT_READ_FAILED,
};

// ============================================================================
// Constants
// ============================================================================

/// Entries per correlation table. Entries whose second hop never fires are
/// reclaimed by LRU eviction.
const CORRELATION_CAPACITY: u32 = 65_536;

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Ring buffer for sending events to userspace
///
/// - **Size**: 16MB (~233k records)
/// - **Usage**: Kernel reserves/submits, userspace drains with `ring_buf.next()`
/// - **Overflow**: reservation fails and the record is dropped
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(16 * 1024 * 1024, 0);

/// Map: Event type → admission percentage (0-100)
///
/// Missing keys mean 100. Written once by userspace before probes attach.
#[map]
static SAMPLING_RATES: HashMap<u32, u32> = HashMap::with_max_entries(MAX_SAMPLING_ENTRIES, 0);

/// Map: New goroutine id → creator goroutine id
#[map]
static GOROUTINES_IN_CREATION: LruHashMap<u64, u64> =
    LruHashMap::with_max_entries(CORRELATION_CAPACITY, 0);

/// Map: Exiting goroutine id → `goexit1` entry time (ns)
#[map]
static GOROUTINES_IN_EXIT: LruHashMap<u64, u64> =
    LruHashMap::with_max_entries(CORRELATION_CAPACITY, 0);

/// Map: `STAT_*` key → count. Best effort, increments are not atomic.
#[map]
static CAPTURE_STATS: HashMap<u32, u64> = HashMap::with_max_entries(STAT_COUNT, 0);

#[cfg(not(test))]
#[no_mangle]
#[link_section = "license"]
static LICENSE: [u8; 4] = *b"GPL\0";

// ============================================================================
// Kernel Environment
// ============================================================================

struct Table(&'static LruHashMap<u64, u64>);

impl CorrelationTable for Table {
    #[inline(always)]
    fn get(&self, key: u64) -> Option<u64> {
        unsafe { self.0.get(&key).copied() }
    }

    #[inline(always)]
    fn put(&self, key: u64, value: u64) -> Result<(), i64> {
        self.0.insert(&key, &value, 0)
    }

    #[inline(always)]
    fn delete(&self, key: u64) {
        let _ = self.0.remove(&key);
    }
}

struct Slot(RingBufEntry<GoRuntimeEvent>);

impl EventSlot for Slot {
    #[inline(always)]
    fn submit(self, event: GoRuntimeEvent) {
        let mut entry = self.0;
        entry.write(event);
        entry.submit(0);
    }

    #[inline(always)]
    fn discard(self) {
        self.0.discard(0);
    }
}

struct Events;

impl EventChannel for Events {
    type Slot = Slot;

    #[inline(always)]
    fn reserve(&self) -> Option<Slot> {
        EVENTS.reserve::<GoRuntimeEvent>(0).map(Slot)
    }
}

/// Handler environment backed by BPF helpers and the maps above
struct Kernel {
    creations: Table,
    exits: Table,
    events: Events,
}

impl Kernel {
    #[inline(always)]
    fn new() -> Self {
        Self {
            creations: Table(&GOROUTINES_IN_CREATION),
            exits: Table(&GOROUTINES_IN_EXIT),
            events: Events,
        }
    }
}

impl TargetMemory for Kernel {
    #[inline(always)]
    fn read_u64(&self, addr: u64) -> Result<u64, i64> {
        unsafe { bpf_probe_read_user(addr as *const u64) }
    }

    #[inline(always)]
    fn read_u8(&self, addr: u64) -> Result<u8, i64> {
        unsafe { bpf_probe_read_user(addr as *const u8) }
    }
}

impl SamplingConfig for Kernel {
    #[inline(always)]
    fn rate(&self, event_type: EventType) -> Option<u32> {
        unsafe { SAMPLING_RATES.get(&(event_type as u32)).copied() }
    }

    #[inline(always)]
    fn random_u32(&self) -> u32 {
        unsafe { bpf_get_prandom_u32() }
    }
}

impl Clock for Kernel {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }
}

impl Environment for Kernel {
    type Table = Table;
    type Channel = Events;

    #[inline(always)]
    fn creations(&self) -> &Table {
        &self.creations
    }

    #[inline(always)]
    fn exits(&self) -> &Table {
        &self.exits
    }

    #[inline(always)]
    fn channel(&self) -> &Events {
        &self.events
    }
}

// ============================================================================
// Go Register ABI
// ============================================================================

/// Current goroutine (`g`), kept in x28 on arm64
#[cfg(bpf_target_arch = "aarch64")]
#[inline(always)]
fn current_g(ctx: &ProbeContext) -> u64 {
    unsafe { (*ctx.regs).regs[28] }
}

/// Integer argument `n`: x0-x15 on arm64
#[cfg(bpf_target_arch = "aarch64")]
#[inline(always)]
fn go_arg(ctx: &ProbeContext, n: usize) -> u64 {
    if n > 15 {
        return 0;
    }
    unsafe { (*ctx.regs).regs[n] }
}

/// Current goroutine (`g`), kept in r14 on amd64
#[cfg(bpf_target_arch = "x86_64")]
#[inline(always)]
fn current_g(ctx: &ProbeContext) -> u64 {
    unsafe { (*ctx.regs).r14 }
}

/// Integer argument `n`: RAX, RBX, RCX, RDI, RSI, R8, R9, R10, R11 on amd64
#[cfg(bpf_target_arch = "x86_64")]
#[inline(always)]
fn go_arg(ctx: &ProbeContext, n: usize) -> u64 {
    let regs = unsafe { &*ctx.regs };
    match n {
        0 => regs.rax,
        1 => regs.rbx,
        2 => regs.rcx,
        3 => regs.rdi,
        4 => regs.rsi,
        5 => regs.r8,
        6 => regs.r9,
        7 => regs.r10,
        8 => regs.r11,
        _ => 0,
    }
}

// ============================================================================
// Failure Reporting
// ============================================================================

#[inline(always)]
fn bump(key: u32) {
    unsafe {
        let current = CAPTURE_STATS.get(&key).copied().unwrap_or(0);
        let _ = CAPTURE_STATS.insert(&key, &(current + 1), 0);
    }
}

/// Log and count a failed invocation. The traced program is never affected.
#[inline(always)]
fn finish(ctx: &ProbeContext, probe: &str, result: Result<Outcome, CaptureError>) -> u32 {
    let Err(err) = result else {
        return 0;
    };

    match err {
        CaptureError::ChannelFull => {
            bump(STAT_CHANNEL_FULL);
            warn!(ctx, "{}: ring buffer full, event dropped", probe);
        }
        CaptureError::CorrelationUpdate(ret) => {
            bump(STAT_CORRELATION_FAILED);
            error!(ctx, "{}: failed to update correlation table, ret={}", probe, ret);
        }
        CaptureError::ReadGoroutine(ret) => {
            bump(STAT_READ_FAILED);
            error!(ctx, "{}: failed to read goroutine, ret={}", probe, ret);
        }
        CaptureError::ReadCallerGoroutine(ret) => {
            bump(STAT_READ_FAILED);
            error!(ctx, "{}: failed to read caller goroutine, ret={}", probe, ret);
        }
        CaptureError::ReadType(ret) => {
            bump(STAT_READ_FAILED);
            error!(ctx, "{}: failed to read type, ret={}", probe, ret);
        }
        CaptureError::ReadMapType(ret) => {
            bump(STAT_READ_FAILED);
            error!(ctx, "{}: failed to read map type, ret={}", probe, ret);
        }
        CaptureError::ReadKeyType(ret) => {
            bump(STAT_READ_FAILED);
            error!(ctx, "{}: failed to read map key type, ret={}", probe, ret);
        }
        CaptureError::ReadElemType(ret) => {
            bump(STAT_READ_FAILED);
            error!(ctx, "{}: failed to read map elem type, ret={}", probe, ret);
        }
    }
    0
}

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Hook: runtime.casgstatus(gp *g, oldval, newval uint32)
#[uprobe]
pub fn uprobe_casgstatus(ctx: ProbeContext) -> u32 {
    let env = Kernel::new();
    let gp = go_arg(&ctx, 0);
    let old_status = go_arg(&ctx, 1) as u32;
    let new_status = go_arg(&ctx, 2) as u32;
    finish(&ctx, "casgstatus", on_status_change(&env, gp, old_status, new_status))
}

/// Hook: runtime.makeslice(et *_type, len, cap int)
#[uprobe]
pub fn uprobe_makeslice(ctx: ProbeContext) -> u32 {
    let env = Kernel::new();
    let (elem_type, len, cap) = (go_arg(&ctx, 0), go_arg(&ctx, 1), go_arg(&ctx, 2));
    let result = on_make_slice(&env, current_g(&ctx), elem_type, len, cap);
    finish(&ctx, "makeslice", result)
}

/// Hook: runtime.makemap(t *abi.MapType, hint int, m *maps.Map)
#[uprobe]
pub fn uprobe_makemap(ctx: ProbeContext) -> u32 {
    let env = Kernel::new();
    let result = on_make_map(&env, current_g(&ctx), go_arg(&ctx, 0), go_arg(&ctx, 1));
    finish(&ctx, "makemap", result)
}

/// Hook: runtime.newobject(typ *_type)
#[uprobe]
pub fn uprobe_newobject(ctx: ProbeContext) -> u32 {
    let env = Kernel::new();
    let result = on_new_object(&env, current_g(&ctx), go_arg(&ctx, 0));
    finish(&ctx, "newobject", result)
}

/// Hook: runtime.newproc1(fn *funcval, callergp *g, callerpc uintptr, ...)
#[uprobe]
pub fn uprobe_newproc1(ctx: ProbeContext) -> u32 {
    let env = Kernel::new();
    let result = on_new_goroutine(&env, current_g(&ctx), go_arg(&ctx, 1));
    finish(&ctx, "newproc1", result)
}

/// Hook: runtime.goexit1()
#[uprobe]
pub fn uprobe_goexit1(ctx: ProbeContext) -> u32 {
    let env = Kernel::new();
    finish(&ctx, "goexit1", on_goroutine_exit(&env, current_g(&ctx)))
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
