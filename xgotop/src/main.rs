//! # xgotop - Main Entry Point
//!
//! Supports three operational modes:
//! - **Live TUI** (`--pid <PID>`, `-b <PATH>` or `xgotop <PROCESS>`)
//! - **Headless** (`--headless`): one line per event, optional `--record`
//! - **Sessions** (`--list-sessions`, `--replay <ID>`): no eBPF, no root
//! - **Web** (`--web`): records, and serves the session API and `/ws` stream
//!
//! Pipeline: the main task drains the ring buffer onto a bounded channel,
//! `--process-workers` threads fold events into the tracker and store, and
//! the TUI thread polls the tracker.

// Main function is intentionally long for clarity
#![allow(clippy::too_many_lines, clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use xgotop_common::GoRuntimeEvent;

use xgotop::cli::Args;
use xgotop::domain::{Pid, TracerError};
use xgotop::preflight::{check_process_exists, run_preflight_checks};
use xgotop::process_lookup::{find_process_by_name, resolve_exe_path};
use xgotop::profiling::{
    attach_runtime_probes, display_sessions, display_summary, forward_record, init_ebpf_logger,
    load_ebpf_program, print_capture_diagnostics, raise_memlock_limit, spawn_workers,
    take_event_ring, write_sampling_rates, EventProcessor, Forwarded, MetricsCollector,
    PipelineCounters, DRAIN_BATCH, EVENT_CHANNEL_CAPACITY,
};
use xgotop::storage::{EventFilter, EventStore, Session, SessionManager};
use xgotop::tracker::Tracker;
use xgotop::tui;
use xgotop::web::{self, WebState, LIVE_STREAM_CAPACITY};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Reader loop idle sleep when the ring buffer is empty
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long open web connections get to finish on shutdown
const WEB_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<TracerError>() {
        Some(TracerError::PermissionDenied(_)) => return EXIT_NOPERM,
        Some(TracerError::Aya(e)) if e.to_string().to_lowercase().contains("permission denied") => {
            return EXIT_NOPERM;
        }
        _ => {}
    }
    if err.to_string().contains("Missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Resolve the optional PID and the Go executable to attach to.
///
/// - `xgotop my-app` - find process by name, binary from /proc
/// - `xgotop --pid 1234` - explicit PID, binary from /proc
/// - `xgotop -b ./app` - every process running `./app`
fn resolve_target(args: &Args) -> Result<(Option<Pid>, PathBuf)> {
    if let Some(ref name) = args.process {
        let info = find_process_by_name(name)?;
        return Ok((Some(info.pid), info.exe_path));
    }

    if let Some(pid) = args.pid {
        let pid = Pid(pid);
        return Ok((Some(pid), resolve_exe_path(pid)?));
    }

    if let Some(ref binary) = args.binary {
        let path = std::fs::canonicalize(binary)
            .with_context(|| format!("Failed to resolve path: {}", binary.display()))?;
        return Ok((None, path));
    }

    anyhow::bail!(
        "Missing required argument: PROCESS, --pid or --binary\n\n\
         Usage:\n  \
         xgotop my-app              Auto-detect PID and binary\n  \
         xgotop --pid 1234          Explicit PID\n  \
         xgotop -b ./app            Every process running ./app\n\n\
         Run 'xgotop --help' for more options"
    )
}

fn list_sessions(storage_dir: &Path) -> Result<()> {
    let manager = SessionManager::new(storage_dir)?;
    display_sessions(&manager.list()?);
    Ok(())
}

fn replay_session(storage_dir: &Path, id: &str) -> Result<()> {
    let manager = SessionManager::new(storage_dir)?;
    let store = manager.open(id)?;
    let session = store.session();
    let events = store.read_events(&EventFilter::default())?;

    println!("session: {}", session.id);
    println!("binary: {}", session.binary_path);
    if let Some(pid) = session.pid {
        println!("pid: {pid}");
    }
    if session.ended_at.is_none() {
        warn!("Session {id} was not finished cleanly");
    }

    let mut tracker = Tracker::new();
    for event in &events {
        tracker.apply(event);
    }
    display_summary(&tracker);
    Ok(())
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    if args.list_sessions {
        return list_sessions(&args.storage_dir);
    }
    if let Some(ref id) = args.replay {
        return replay_session(&args.storage_dir, id);
    }

    let (pid, binary) = resolve_target(&args)?;

    // Run pre-flight checks before anything else
    run_preflight_checks(&binary)?;
    if let Some(pid) = pid {
        check_process_exists(pid)?;
    }

    println!("xgotop v{}", env!("CARGO_PKG_VERSION"));
    println!("binary: {}", binary.display());
    if let Some(pid) = pid {
        println!("pid: {}", pid.0);
    }

    // ── Load and attach ─────────────────────────────────────────────────
    raise_memlock_limit();
    let mut bpf = load_ebpf_program()?;
    init_ebpf_logger(&mut bpf);

    let rates = args.sample.clone().unwrap_or_default();
    write_sampling_rates(&mut bpf, &rates)?;

    attach_runtime_probes(&mut bpf, &binary, pid)?;
    let mut ring_buf = take_event_ring(&mut bpf)?;

    // ── Session recording ───────────────────────────────────────────────
    let store: Option<Arc<dyn EventStore>> = if args.record || args.web {
        let manager = SessionManager::new(&args.storage_dir)?;
        let session = Session::new(pid.map(|p| p.0), binary.to_string_lossy());
        let id = session.id.clone();
        let store = manager.create(session, args.storage_format)?;
        if args.headless || args.web {
            println!("recording: {id} ({})", args.storage_format);
        }
        Some(Arc::from(store))
    } else {
        None
    };

    // ── Processing workers ──────────────────────────────────────────────
    let tracker = Arc::new(Mutex::new(Tracker::new()));
    let counters = Arc::new(PipelineCounters::default());
    let mut processor = EventProcessor::new(Arc::clone(&tracker), Arc::clone(&counters))
        .with_event_log(args.headless && !args.silent);
    if let Some(ref store) = store {
        processor = processor.with_store(Arc::clone(store));
    }

    // ── Web API ─────────────────────────────────────────────────────────
    let web = if args.web {
        let (live, _) = broadcast::channel(LIVE_STREAM_CAPACITY);
        processor = processor.with_live_stream(live.clone());
        let state = Arc::new(WebState::new(SessionManager::new(&args.storage_dir)?, live));
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.web_port))
            .await
            .with_context(|| format!("Failed to bind web port {}", args.web_port))?;
        let (stop_web, web_stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(web::serve(listener, Arc::clone(&state), async move {
            let _ = web_stopped.await;
        }));
        info!("Web API listening on http://localhost:{}", args.web_port);
        Some((state, stop_web, server))
    } else {
        None
    };

    let (tx, rx) = bounded::<GoRuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let workers = spawn_workers(&processor, &rx, args.process_workers)
        .context("Failed to spawn processing workers")?;
    drop(rx);

    // ── TUI ─────────────────────────────────────────────────────────────
    let stop = Arc::new(AtomicBool::new(false));
    let tui_handle = if args.headless {
        None
    } else {
        let tracker = Arc::clone(&tracker);
        let counters = Arc::clone(&counters);
        let stop = Arc::clone(&stop);
        Some(std::thread::spawn(move || tui::run_live(tracker, counters, pid, stop)))
    };

    let mut metrics = MetricsCollector::new(Arc::clone(&counters), args.process_workers);
    let mut stats_tick = tokio::time::interval(Duration::from_secs(1));
    stats_tick.tick().await;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let proc_path = pid.map(|p| PathBuf::from(format!("/proc/{}", p.0)));
    let mut exit_reason = "interrupted";

    // Main reader loop
    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }
        if proc_path.as_ref().is_some_and(|p| !p.exists()) {
            exit_reason = "process exited";
            break;
        }
        if stop.load(Ordering::Relaxed) {
            exit_reason = "quit";
            break;
        }

        // Bounded so a busy target cannot starve the timers and stop checks
        for _ in 0..DRAIN_BATCH {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let Some(item) = ring_buf.next() else {
                break;
            };
            match forward_record(&item, &tx, &counters) {
                Forwarded::Queued => {}
                Forwarded::Short => warn!("Received incomplete event ({} bytes)", item.len()),
                Forwarded::Dropped => {
                    if counters.dropped() == 1 {
                        warn!("Processing workers are behind, dropping events");
                    }
                }
                // Workers only disconnect by panicking
                Forwarded::Disconnected => anyhow::bail!("All processing workers exited"),
            }
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = stats_tick.tick() => {
                if args.metrics || args.headless || web.is_some() {
                    let sample = metrics.sample();
                    if let Some((state, ..)) = &web {
                        state.publish_metrics(sample);
                    }
                }
            }
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────
    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = tui_handle {
        match handle.join() {
            Ok(Err(e)) => warn!("TUI exited with error: {e}"),
            Err(_) => warn!("TUI thread panicked"),
            Ok(Ok(())) => {}
        }
    }

    // Closing the channel lets workers drain what was already read
    drop(tx);
    for handle in workers {
        if handle.join().is_err() {
            warn!("Processing worker panicked");
        }
    }

    if let Some(store) = store {
        store.flush()?;
        let mut session = store.session();
        session.finish(session.event_count);
        store.update_session(&session)?;
        println!("saved session: {} ({} events)", session.id, session.event_count);
    }
    if let Some((_, stop_web, server)) = web {
        let _ = stop_web.send(());
        match tokio::time::timeout(WEB_SHUTDOWN_GRACE, server).await {
            Ok(Ok(Err(e))) => warn!("Web API failed: {e}"),
            Err(_) => warn!("Web API connections still open after {}s", WEB_SHUTDOWN_GRACE.as_secs()),
            _ => {}
        }
    }
    if counters.store_errors() > 0 {
        warn!("{} events could not be stored", counters.store_errors());
    }
    if counters.dropped() > 0 {
        warn!("{} events dropped on a full processing queue", counters.dropped());
    }
    if counters.short_records() > 0 {
        warn!("{} incomplete ring buffer records dropped", counters.short_records());
    }

    if args.metrics {
        let path = metrics.write_json(Path::new("."), args.metrics_suffix.as_deref())?;
        println!("metrics: {}", path.display());
    }

    eprintln!(
        "\n{exit_reason}: {:.1}s, {} events read, {} processed",
        started.elapsed().as_secs_f64(),
        counters.read(),
        counters.processed()
    );
    print_capture_diagnostics(&bpf)?;
    display_summary(&tracker.lock().unwrap_or_else(PoisonError::into_inner));

    Ok(())
}
