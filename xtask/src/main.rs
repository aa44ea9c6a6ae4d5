use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Architecture of the Go programs to trace (selects the register layout)
        #[arg(long, default_value = std::env::consts::ARCH)]
        arch: String,
        #[arg(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, arch, release } => build_ebpf(&target, &arch, release)?,
    }

    Ok(())
}

fn build_ebpf(target: &str, arch: &str, _release: bool) -> Result<()> {
    if !matches!(arch, "x86_64" | "aarch64") {
        anyhow::bail!("Unsupported architecture '{arch}' (expected x86_64 or aarch64)");
    }

    // Always build in release mode because debug builds with recent Rust nightlies (1.94+)
    // pull in formatting code (LowerHex) that's incompatible with BPF linker.
    // Release mode uses LTO to eliminate dead code.
    let mut cmd = Command::new("cargo");
    cmd.arg("+nightly")
        .arg("build")
        .arg("--package")
        .arg("xgotop-ebpf")
        .arg("--target")
        .arg(target)
        .arg("-Z")
        .arg("build-std=core")
        .arg("--release") // Always release
        .env("CARGO_CFG_BPF_TARGET_ARCH", arch);

    let status = cmd.status().context("Failed to build eBPF program")?;

    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    println!("✓ eBPF program built successfully");
    println!("  Target: {target} ({arch} register layout)");
    println!("  Profile: release (always)");

    Ok(())
}
