//! # xgotop - eBPF-based Go Runtime Observer
//!
//! xgotop attaches uprobes to a Go executable's runtime functions and streams
//! goroutine lifecycle and heap allocation events to userspace, without
//! modifying or restarting the target.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Go Application                           │
//! │           runtime.casgstatus / newobject / makemap ...          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ uprobes
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │  • Read g / _type / maptype from target memory                  │
//! │  • Correlate newproc1 → casgstatus, goexit1 → casgstatus        │
//! │  • Per-event sampling, 72-byte records into EVENTS ring buffer  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ring buffer events
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      xgotop (This Crate)                        │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Reader    │──▶│  Processing  │──▶│     TUI      │         │
//! │  │ (ring buffer)│   │   workers    │   │  (Terminal)  │         │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘         │
//! │                            ▼                                    │
//! │                     ┌──────────────┐   ┌──────────────┐         │
//! │                     │   Storage    │──▶│   Web API    │         │
//! │                     │ jsonl/bin/db │   │  REST + /ws  │         │
//! │                     └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: eBPF loading and attachment, processing workers, metrics
//! - [`tracker`]: per-goroutine state folded from the event stream
//! - [`storage`]: recorded sessions in JSONL, binary or SQLite form
//! - [`web`]: `--web` session API and live event stream
//! - [`sampling`]: `--sample` parsing into per-event rates
//! - [`tui`]: live goroutine view
//! - [`cli`]: command-line arguments
//! - [`preflight`]: privilege, kernel and Go binary checks
//! - [`process_lookup`]: target resolution by name or pid
//! - [`domain`]: id newtypes and error enums
//!
//! ## Operational Modes
//!
//! 1. **Live TUI Mode** (default)
//! 2. **Headless Mode** (`--headless`): one line per event on stdout
//! 3. **Web Mode** (`--web`): record, and serve sessions plus live events
//! 4. **Replay Mode** (`--replay <SESSION-ID>`): summarise a recorded session
//!
//! ## Typical Usage
//!
//! ```bash
//! sudo xgotop --pid <PID>
//! sudo xgotop -b ./server --headless --record --storage-format jsonl
//! xgotop --list-sessions
//! xgotop --replay <SESSION-ID>
//! ```

// Expose modules for testing
pub mod cli;
pub mod clock;
pub mod domain;
pub mod preflight;
pub mod process_lookup;
pub mod profiling;
pub mod sampling;
pub mod storage;
pub mod tracker;
pub mod tui;
pub mod web;
