//! # eBPF Program Loading and Attachment
//!
//! Loads the compiled probes and attaches them to the Go runtime of the
//! target executable.
//!
//! ## Functions
//!
//! - [`load_ebpf_program()`] - Load eBPF bytecode built by `cargo xtask build-ebpf`,
//!   embedded with the `embed-ebpf` feature
//! - [`attach_runtime_probes()`] - Attach the six uprobes in [`RUNTIME_PROBES`]
//! - [`write_sampling_rates()`] - Push `--sample` overrides into `SAMPLING_RATES`
//! - [`take_event_ring()`] - Hand the `EVENTS` ring buffer to the reader loop
//!
//! ## Attachment Points
//!
//! Uprobes on function entry only. `newproc1`'s result can't be observed,
//! so the new goroutine is correlated on its first status change instead.

#![allow(unsafe_code)] // setrlimit() requires unsafe

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use aya::maps::{HashMap, MapData, RingBuf};
use aya::programs::UProbe;
use aya::Ebpf;
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use xgotop_common::sampling::MAX_SAMPLING_ENTRIES;

use crate::domain::{Pid, TracerError};
use crate::sampling::SamplingRates;

/// Environment variable overriding the eBPF object location
pub const EBPF_OBJECT_ENV: &str = "XGOTOP_EBPF_OBJECT";

/// Always the release build: debug eBPF builds pull in formatting code the
/// verifier rejects
#[cfg(not(feature = "embed-ebpf"))]
const BUILD_TREE_OBJECT: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/../target/bpfel-unknown-none/release/xgotop");

/// Where the eBPF object comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EbpfObject {
    /// Compiled into the binary (`embed-ebpf` feature)
    Embedded,
    File(PathBuf),
}

/// One uprobe program and the runtime function it hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeProbe {
    pub program: &'static str,
    pub symbol: &'static str,
}

pub const RUNTIME_PROBES: [RuntimeProbe; 6] = [
    RuntimeProbe { program: "uprobe_casgstatus", symbol: "runtime.casgstatus" },
    RuntimeProbe { program: "uprobe_makeslice", symbol: "runtime.makeslice" },
    RuntimeProbe { program: "uprobe_makemap", symbol: "runtime.makemap" },
    RuntimeProbe { program: "uprobe_newobject", symbol: "runtime.newobject" },
    RuntimeProbe { program: "uprobe_newproc1", symbol: "runtime.newproc1" },
    RuntimeProbe { program: "uprobe_goexit1", symbol: "runtime.goexit1" },
];

/// `$XGOTOP_EBPF_OBJECT` wins, then the embedded object, then the xtask output
#[must_use]
pub fn ebpf_object() -> EbpfObject {
    select_object(std::env::var_os(EBPF_OBJECT_ENV))
}

fn select_object(override_path: Option<OsString>) -> EbpfObject {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return EbpfObject::File(PathBuf::from(path));
    }
    #[cfg(feature = "embed-ebpf")]
    {
        EbpfObject::Embedded
    }
    #[cfg(not(feature = "embed-ebpf"))]
    {
        EbpfObject::File(PathBuf::from(BUILD_TREE_OBJECT))
    }
}

/// Load the eBPF program binary
///
/// # Errors
/// [`TracerError::EbpfLoadFailed`] if the object is missing or rejected
pub fn load_ebpf_program() -> Result<Ebpf, TracerError> {
    let loaded = match ebpf_object() {
        #[cfg(feature = "embed-ebpf")]
        EbpfObject::Embedded => {
            debug!("Loading embedded eBPF object");
            Ebpf::load(aya::include_bytes_aligned!(
                "../../../target/bpfel-unknown-none/release/xgotop"
            ))
        }
        #[cfg(not(feature = "embed-ebpf"))]
        EbpfObject::Embedded => {
            return Err(TracerError::EbpfLoadFailed("built without embed-ebpf".to_string()));
        }
        EbpfObject::File(path) => {
            if !path.is_file() {
                return Err(TracerError::EbpfLoadFailed(format!(
                    "{} not found (run `cargo xtask build-ebpf` or set {EBPF_OBJECT_ENV})",
                    path.display()
                )));
            }
            debug!("Loading eBPF object {}", path.display());
            Ebpf::load_file(&path)
        }
    };
    loaded.map_err(|e| TracerError::EbpfLoadFailed(e.to_string()))
}

/// Lift `RLIMIT_MEMLOCK` for kernels that still charge BPF maps against it
pub fn raise_memlock_limit() {
    let rlimit = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        debug!("Failed to remove RLIMIT_MEMLOCK: {}", std::io::Error::last_os_error());
    }
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Load and attach every probe in [`RUNTIME_PROBES`] to `binary`
///
/// With `pid` set only that process is traced; otherwise every process
/// running `binary`.
///
/// # Errors
/// [`TracerError::ProbeAttachFailed`] on the first probe that fails
pub fn attach_runtime_probes(bpf: &mut Ebpf, binary: &Path, pid: Option<Pid>) -> Result<(), TracerError> {
    let attach_failed = |probe: &RuntimeProbe, error: String| TracerError::ProbeAttachFailed {
        probe: probe.program.to_string(),
        binary: binary.display().to_string(),
        error,
    };

    for probe in &RUNTIME_PROBES {
        let program: &mut UProbe = bpf
            .program_mut(probe.program)
            .ok_or(TracerError::ProgramNotFound(probe.program))?
            .try_into()?;
        program.load().map_err(|e| attach_failed(probe, e.to_string()))?;
        program
            .attach(Some(probe.symbol), 0, binary, pid.map(|p| p.0))
            .map_err(|e| attach_failed(probe, e.to_string()))?;
        info!("✓ Attached uprobe: {}", probe.symbol);
    }
    Ok(())
}

/// Write per-event admission percentages into the `SAMPLING_RATES` map
///
/// # Errors
/// Missing map or a failed insert
pub fn write_sampling_rates(bpf: &mut Ebpf, rates: &SamplingRates) -> Result<()> {
    if rates.is_empty() {
        return Ok(());
    }
    if rates.len() > MAX_SAMPLING_ENTRIES as usize {
        bail!("at most {MAX_SAMPLING_ENTRIES} sampling rates are supported");
    }

    let mut map: HashMap<_, u32, u32> = HashMap::try_from(
        bpf.map_mut("SAMPLING_RATES").ok_or(TracerError::MapNotFound("SAMPLING_RATES"))?,
    )?;
    for (event_type, percent) in rates.iter() {
        map.insert(event_type as u32, percent, 0)?;
        info!("Sampling {}: {percent}%", event_type.name());
    }
    Ok(())
}

/// Take ownership of the `EVENTS` ring buffer
///
/// # Errors
/// Missing map or wrong map type
pub fn take_event_ring(bpf: &mut Ebpf) -> Result<RingBuf<MapData>, TracerError> {
    let map = bpf.take_map("EVENTS").ok_or(TracerError::MapNotFound("EVENTS"))?;
    Ok(RingBuf::try_from(map)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_table_is_unique() {
        let mut programs: Vec<_> = RUNTIME_PROBES.iter().map(|p| p.program).collect();
        programs.sort_unstable();
        programs.dedup();
        assert_eq!(programs.len(), RUNTIME_PROBES.len());
        assert!(RUNTIME_PROBES.iter().all(|p| p.symbol.starts_with("runtime.")));
    }

    #[test]
    fn test_env_override_comes_first() {
        let picked = select_object(Some(OsString::from("/opt/xgotop/probes.o")));
        assert_eq!(picked, EbpfObject::File(PathBuf::from("/opt/xgotop/probes.o")));
    }

    #[cfg(feature = "embed-ebpf")]
    #[test]
    fn test_embedded_object_without_override() {
        assert_eq!(select_object(None), EbpfObject::Embedded);
        assert_eq!(select_object(Some(OsString::new())), EbpfObject::Embedded);
    }

    #[cfg(not(feature = "embed-ebpf"))]
    #[test]
    fn test_build_tree_object_without_override() {
        let EbpfObject::File(path) = select_object(None) else {
            panic!("expected a file object");
        };
        assert!(path.ends_with("bpfel-unknown-none/release/xgotop"));
        assert_eq!(select_object(Some(OsString::new())), EbpfObject::File(path));
    }
}
