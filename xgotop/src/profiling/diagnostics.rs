use anyhow::Result;
use aya::maps::HashMap;
use aya::Ebpf;
use xgotop_common::{STAT_CHANNEL_FULL, STAT_CORRELATION_FAILED, STAT_READ_FAILED};

use crate::domain::TracerError;

/// In-kernel failure counters (`CAPTURE_STATS`)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    /// Records dropped because the ring buffer was full
    pub channel_full: u64,
    /// Probe hits abandoned on an unreadable `g` or type descriptor
    pub read_failed: u64,
    /// Correlation entries that could not be stored
    pub correlation_failed: u64,
}

impl CaptureStats {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Read the probe-side counters
///
/// # Errors
/// Returns an error if the `CAPTURE_STATS` map cannot be accessed
pub fn read_capture_stats(bpf: &Ebpf) -> Result<CaptureStats> {
    let map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map("CAPTURE_STATS").ok_or(TracerError::MapNotFound("CAPTURE_STATS"))?)?;
    // A missing key means the counter never fired
    let get = |key: u32| map.get(&key, 0).unwrap_or(0);

    Ok(CaptureStats {
        channel_full: get(STAT_CHANNEL_FULL),
        read_failed: get(STAT_READ_FAILED),
        correlation_failed: get(STAT_CORRELATION_FAILED),
    })
}

/// Print the probe-side counters
///
/// # Errors
/// Returns an error if the `CAPTURE_STATS` map cannot be accessed
pub fn print_capture_diagnostics(bpf: &Ebpf) -> Result<()> {
    let stats = read_capture_stats(bpf)?;
    if stats.is_clean() {
        return Ok(());
    }

    eprintln!("probe diagnostics:");
    eprintln!("   - dropped (ring buffer full): {}", stats.channel_full);
    eprintln!("   - abandoned (read failures): {}", stats.read_failed);
    eprintln!("   - correlation updates failed: {}", stats.correlation_failed);
    Ok(())
}
