//! Exposes the architecture of the traced process as `cfg(bpf_target_arch)`.
//!
//! The eBPF target itself is architecture-neutral, but the register layout of
//! `pt_regs` is not. `CARGO_CFG_BPF_TARGET_ARCH` wins when set (cross builds),
//! otherwise the host architecture is assumed.

use std::env;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(bpf_target_arch, values(\"x86_64\", \"aarch64\"))");
    println!("cargo::rerun-if-env-changed=CARGO_CFG_BPF_TARGET_ARCH");

    let arch = env::var("CARGO_CFG_BPF_TARGET_ARCH").unwrap_or_else(|_| {
        let host = env::var("HOST").unwrap_or_default();
        host.split_once('-').map_or(host.as_str(), |(arch, _)| arch).to_owned()
    });

    println!("cargo::rustc-cfg=bpf_target_arch=\"{arch}\"");
}
