//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::sampling::{parse_sampling_rates, SamplingRates};
use crate::storage::StorageFormat;

#[derive(Parser, Debug)]
#[command(
    name = "xgotop",
    version,
    about = "Watch goroutines and Go heap allocations live with eBPF",
    after_help = "\
EXAMPLES:
    sudo xgotop my-service                        Find the process by name
    sudo xgotop --pid 1234                        Trace one process
    sudo xgotop -b ./server                       Trace every process running ./server
    sudo xgotop --pid 1234 --headless --record    Log events and record a session
    sudo xgotop --pid 1234 --sample 'newobject:0.1,makeslice:0.5'
    sudo xgotop --pid 1234 --headless --web       Serve sessions and live events on :8080
    xgotop --list-sessions
    xgotop --replay <SESSION-ID>"
)]
pub struct Args {
    /// Process name to trace (auto-detects PID and binary)
    #[arg(value_name = "PROCESS", conflicts_with_all = ["binary", "pid"])]
    pub process: Option<String>,

    /// Go executable to attach to (all processes running it)
    #[arg(short, long, value_name = "PATH", conflicts_with = "pid")]
    pub binary: Option<PathBuf>,

    /// Process ID to trace (binary resolved through /proc/<pid>/exe)
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Per-event sampling rates, e.g. "newobject:0.1,makemap:0.5"
    ///
    /// Names: casgstatus, makeslice, makemap, newobject, newgoroutine, goexit.
    /// Rates are probabilities in [0, 1]; unlisted events are always captured.
    #[arg(long, value_name = "RATES", value_parser = parse_sampling_rates)]
    pub sample: Option<SamplingRates>,

    /// Number of event processing workers
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub process_workers: u32,

    /// Run without the TUI, printing one line per event
    #[arg(long)]
    pub headless: bool,

    /// Do not print events in headless mode
    #[arg(short, long)]
    pub silent: bool,

    /// Stop after N seconds (0 = until Ctrl+C or target exit)
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Record events to a session under --storage-dir
    #[arg(long)]
    pub record: bool,

    /// Directory holding recorded sessions
    #[arg(long, default_value = "./sessions")]
    pub storage_dir: PathBuf,

    /// Session event format: binary, jsonl or sqlite
    #[arg(long, default_value = "binary")]
    pub storage_format: StorageFormat,

    /// Serve the session API and live event stream over HTTP (implies --record)
    #[arg(long)]
    pub web: bool,

    /// Port for --web
    #[arg(long, default_value_t = 8080, requires = "web")]
    pub web_port: u16,

    /// List recorded sessions and exit
    #[arg(long)]
    pub list_sessions: bool,

    /// Replay a recorded session and print its summary
    #[arg(long, value_name = "SESSION-ID", conflicts_with_all = ["process", "binary", "pid", "record", "web"])]
    pub replay: Option<String>,

    /// Write per-second pipeline metrics to metrics_<unix-secs>[_<suffix>].json on exit
    #[arg(long)]
    pub metrics: bool,

    /// Suffix for the metrics file name
    #[arg(long, requires = "metrics")]
    pub metrics_suffix: Option<String>,
}
