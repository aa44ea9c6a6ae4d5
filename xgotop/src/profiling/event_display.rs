// Time conversions intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use xgotop_common::layout::{status_name, Kind};
use xgotop_common::{EventType, GoRuntimeEvent};

use crate::domain::GoroutineId;
use crate::storage::Session;
use crate::tracker::Tracker;

fn kind_name(raw: u64) -> &'static str {
    Kind::from_raw(raw).map_or("?", Kind::go_name)
}

#[allow(clippy::cast_possible_truncation)]
fn status(raw: u64) -> &'static str {
    status_name(raw as u32)
}

/// One headless log line for `event`, processed by worker `worker`
#[must_use]
pub fn format_event(worker: usize, event: &GoRuntimeEvent) -> String {
    let a = &event.attributes;
    let g = GoroutineId(event.goroutine);
    let head = format!("[PW-{worker}] [ts:{},lat:{}]", event.timestamp_ns, event.handler_duration_ns);

    let Some(kind) = event.kind() else {
        return format!("[PW-{worker}] UNKNOWN EVENT TYPE: {}", event.event_type);
    };

    match kind {
        EventType::StatusChange => {
            format!("{head} {} state {} -> {}", GoroutineId(a[2]), status(a[0]), status(a[1]))
        }
        EventType::AllocateSlice => format!(
            "{head} {g} allocated slice []{} with length {} and capacity {}",
            kind_name(a[1]),
            a[2],
            a[3]
        ),
        EventType::AllocateMap => format!(
            "{head} {g} allocated map[{}]{} with initial capacity {}",
            kind_name(a[1]),
            kind_name(a[3]),
            a[4]
        ),
        EventType::AllocateObject => {
            format!("{head} {g} allocated object of size {} and kind {}", a[0], kind_name(a[1]))
        }
        EventType::GoroutineCreated => {
            format!("{head} {} created new goroutine {}", GoroutineId(a[0]), GoroutineId(a[1]))
        }
        EventType::GoroutineExited => format!("{head} {} exited", GoroutineId(a[0])),
    }
}

/// Human-readable byte count
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Print the end-of-run (or replay) summary
pub fn display_summary(tracker: &Tracker) {
    let span = tracker.span_ns() as f64 / 1_000_000_000.0;
    println!("\nevents: {} over {span:.2}s", tracker.total_events());
    for event_type in EventType::ALL {
        println!("  {:<13} {}", event_type.name(), tracker.event_count(event_type));
    }
    if tracker.unknown_events() > 0 {
        println!("  {:<13} {}", "unknown", tracker.unknown_events());
    }

    println!(
        "goroutines: {} created, {} exited, {} live",
        tracker.created(),
        tracker.exited(),
        tracker.live()
    );
    if let Some(lifetime) = tracker.mean_lifetime_ns() {
        println!("  mean lifetime: {:.3}ms", lifetime as f64 / 1_000_000.0);
    }
    if let Some(lat) = tracker.mean_handler_ns() {
        println!("  mean probe latency: {lat}ns");
    }

    let total = tracker.total_allocated();
    println!("allocations: {} ({})", total.count, format_bytes(total.bytes));
    for (kind, stats) in tracker.kinds().into_iter().take(10) {
        println!("  {:<15} {:>10} {:>12}", kind.go_name(), stats.count, format_bytes(stats.bytes));
    }

    let top = tracker.top_goroutines(10);
    if !top.is_empty() {
        println!("top allocating goroutines:");
        for g in top {
            println!(
                "  {:<10} parent {:<10} {:>10} allocs {:>12}",
                GoroutineId(g.id).to_string(),
                GoroutineId(g.parent).to_string(),
                g.allocations.count,
                format_bytes(g.allocations.bytes)
            );
        }
    }
}

/// Print `--list-sessions` output
pub fn display_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("no recorded sessions");
        return;
    }
    println!("{:<36}  {:>12}  {:>8}  {:>10}  BINARY", "ID", "STARTED", "PID", "EVENTS");
    for s in sessions {
        let pid = s.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
        let state = if s.ended_at.is_some() { "" } else { " (unfinished)" };
        println!(
            "{:<36}  {:>12}  {:>8}  {:>10}  {}{state}",
            s.id, s.started_at, pid, s.event_count, s.binary_path
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgotop_common::layout::{G_RUNNABLE, G_RUNNING};

    fn ev(ty: EventType, g: u64, attrs: [u64; 5]) -> GoRuntimeEvent {
        GoRuntimeEvent::stamped(ty, 900, 1_000, g, 1, attrs)
    }

    #[test]
    fn test_status_line() {
        let line = format_event(
            2,
            &ev(EventType::StatusChange, 7, [u64::from(G_RUNNABLE), u64::from(G_RUNNING), 7, 0, 0]),
        );
        assert_eq!(line, "[PW-2] [ts:1000,lat:100] G7 state runnable -> running");
    }

    #[test]
    fn test_map_line_uses_key_and_elem_kinds() {
        let line = format_event(0, &ev(EventType::AllocateMap, 5, [16, 24, 8, 2, 10]));
        assert!(line.ends_with("G5 allocated map[string]int with initial capacity 10"), "{line}");
    }

    #[test]
    fn test_slice_and_object_lines() {
        let line = format_event(1, &ev(EventType::AllocateSlice, 3, [8, 2, 10, 16, 0]));
        assert!(line.ends_with("G3 allocated slice []int with length 10 and capacity 16"));
        let line = format_event(1, &ev(EventType::AllocateObject, 3, [24, 25, 0, 0, 0]));
        assert!(line.ends_with("G3 allocated object of size 24 and kind struct{}"));
    }

    #[test]
    fn test_lifecycle_lines() {
        let line = format_event(0, &ev(EventType::GoroutineCreated, 2, [1, 2, 0, 0, 0]));
        assert!(line.ends_with("G1 created new goroutine G2"));
        let line = format_event(0, &ev(EventType::GoroutineExited, 2, [2, 950, 0, 0, 0]));
        assert!(line.ends_with("G2 exited"));
    }

    #[test]
    fn test_unknown_type() {
        let mut e = ev(EventType::StatusChange, 1, [0; 5]);
        e.event_type = 9;
        assert_eq!(format_event(4, &e), "[PW-4] UNKNOWN EVENT TYPE: 9");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
