//! Profiling core modules
//!
//! - eBPF program loading and probe attachment
//! - Event processing workers
//! - Event display formatting
//! - Pipeline metrics
//! - Probe-side diagnostics

pub mod diagnostics;
pub mod ebpf_setup;
pub mod event_display;
pub mod event_processor;
pub mod metrics;

// Re-export common types
pub use diagnostics::{print_capture_diagnostics, read_capture_stats, CaptureStats};
pub use ebpf_setup::{
    attach_runtime_probes, init_ebpf_logger, load_ebpf_program, raise_memlock_limit,
    take_event_ring, write_sampling_rates, RUNTIME_PROBES,
};
pub use event_display::{display_sessions, display_summary, format_bytes, format_event};
pub use event_processor::{
    forward_record, spawn_workers, EventProcessor, Forwarded, DRAIN_BATCH, EVENT_CHANNEL_CAPACITY,
};
pub use metrics::{MetricsCollector, PipelineCounters};
