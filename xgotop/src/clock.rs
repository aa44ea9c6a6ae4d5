//! Host side of the kernel's event clock

/// `CLOCK_MONOTONIC` in nanoseconds, the clock `bpf_ktime_get_ns()` reads
///
/// Lets userspace compare "now" with `GoRuntimeEvent::timestamp_ns`.
#[must_use]
#[allow(unsafe_code)]
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: ts is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    u64::try_from(ts.tv_sec).unwrap_or(0) * 1_000_000_000 + u64::try_from(ts.tv_nsec).unwrap_or(0)
}
