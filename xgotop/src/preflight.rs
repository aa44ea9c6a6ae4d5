//! Pre-flight checks for xgotop
//!
//! Validates system requirements and the target executable before loading
//! eBPF programs, with actionable error messages.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::warn;
use object::{Architecture, Object, ObjectSymbol};
use std::path::Path;

use crate::domain::{Pid, TracerError};
use crate::profiling::ebpf_setup::RUNTIME_PROBES;

/// Minimum kernel version with BPF ring buffer support
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// The first requirement that isn't met
pub fn run_preflight_checks(binary: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_binary_exists(binary)?;
    check_go_binary(binary)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would also do, but checking them needs more than libc
    Err(TracerError::PermissionDenied(
        "xgotop requires root privileges to load eBPF programs.\n\n\
         Run with: sudo xgotop ..."
            .to_string(),
    )
    .into())
}

/// Parse `major.minor` out of a kernel release like `6.1.0-arch1-1`
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 5.15.0-generic ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");

    let Some((major, minor)) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             xgotop requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

fn check_binary_exists(binary: &Path) -> Result<()> {
    if !binary.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Make sure the path is correct and the binary exists.",
            binary.display()
        );
    }
    if !binary.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --binary must point to an executable file, not a directory.",
            binary.display()
        );
    }
    Ok(())
}

/// Runtime entry points from [`RUNTIME_PROBES`] absent from the ELF symbol tables
///
/// # Errors
/// `data` is not a parseable object file
pub fn missing_runtime_symbols(data: &[u8]) -> Result<Vec<&'static str>, object::Error> {
    let obj = object::File::parse(data)?;
    let present: std::collections::HashSet<&str> = obj
        .symbols()
        .chain(obj.dynamic_symbols())
        .filter_map(|sym| sym.name().ok())
        .collect();

    Ok(RUNTIME_PROBES
        .iter()
        .map(|probe| probe.symbol)
        .filter(|symbol| !present.contains(symbol))
        .collect())
}

/// Check the target is a Go executable for an architecture the probes support
fn check_go_binary(binary: &Path) -> Result<()> {
    let data = std::fs::read(binary)
        .with_context(|| format!("Failed to read binary: {}", binary.display()))?;

    let obj = object::File::parse(&*data)
        .with_context(|| format!("{} is not a valid executable", binary.display()))?;
    check_architecture(obj.architecture())?;

    let missing = missing_runtime_symbols(&data)?;
    if !missing.is_empty() {
        return Err(TracerError::MissingRuntimeSymbols {
            binary: binary.display().to_string(),
            symbols: missing,
        })
        .context("Is this a (non-stripped) Go binary?");
    }
    Ok(())
}

fn check_architecture(arch: Architecture) -> Result<(), TracerError> {
    let name = match arch {
        Architecture::Aarch64 => "aarch64",
        Architecture::X86_64 => "x86_64",
        other => return Err(TracerError::UnsupportedArchitecture(format!("{other:?}"))),
    };
    if name != std::env::consts::ARCH {
        warn!("target is {name} but xgotop runs on {}", std::env::consts::ARCH);
    }
    Ok(())
}

/// Check if the target process exists
///
/// # Errors
/// [`TracerError::ProcessNotFound`] if `/proc/<pid>` is gone
pub fn check_process_exists(pid: Pid) -> Result<(), TracerError> {
    if Path::new(&format!("/proc/{}", pid.0)).exists() {
        Ok(())
    } else {
        Err(TracerError::ProcessNotFound(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("6.1.0-arch1-1"), Some((6, 1)));
        assert_eq!(parse_kernel_release("5.8"), Some((5, 8)));
        assert_eq!(parse_kernel_release("unknown"), None);
        assert!(parse_kernel_release("5.4.0").unwrap() < MIN_KERNEL_VERSION);
    }

    #[test]
    fn test_binary_not_found() {
        let err = check_binary_exists(Path::new("/nonexistent/path/to/binary")).unwrap_err();
        assert!(err.to_string().contains("Binary not found"));
    }

    #[test]
    fn test_directory_is_not_a_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_binary_exists(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Not a file"));
    }

    #[test]
    fn test_process_not_found() {
        let err = check_process_exists(Pid(999_999_999)).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_non_go_binary_misses_runtime_symbols() {
        // The test harness itself is a Rust ELF: parseable, but no Go runtime
        let exe = std::env::current_exe().unwrap();
        let data = std::fs::read(exe).unwrap();
        let missing = missing_runtime_symbols(&data).unwrap();
        assert_eq!(missing.len(), RUNTIME_PROBES.len());
        assert!(missing.contains(&"runtime.newproc1"));
    }

    #[test]
    fn test_garbage_is_not_an_object() {
        assert!(missing_runtime_symbols(b"not an elf").is_err());
    }

    #[test]
    fn test_unsupported_architecture() {
        assert!(check_architecture(Architecture::X86_64).is_ok());
        assert!(check_architecture(Architecture::Aarch64).is_ok());
        assert!(matches!(
            check_architecture(Architecture::Riscv64),
            Err(TracerError::UnsupportedArchitecture(_))
        ));
    }
}
