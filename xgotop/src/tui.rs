//! # Terminal User Interface (TUI)
//!
//! Live goroutine view rendered with `ratatui`.
//!
//! ```text
//! ┌ XGOTOP | [LIVE] | PID:1234 | 12.3s | 48211 evts (3900/s) | lag 2ms ┐
//! ┌ Status ─────────┐┌ Goroutines (41 live) ─────────────────────────┐
//! │                 ││ GOROUTINE PARENT  STATUS   ALLOCS  BYTES  AGE │
//! ├ Allocations ────┤│                                               │
//! └─────────────────┘└───────────────────────────────────────────────┘
//! ```
//!
//! The view polls the shared [`Tracker`] every [`REFRESH_INTERVAL`] instead of
//! receiving events, so rendering never slows the processing workers.
//!
//! ## Keys
//!
//! - `q` / `Ctrl+C` - quit (stops tracing)
//! - `↑` / `↓` - scroll the goroutine table
//!
//! ## Sub-Modules
//!
//! - `goroutines` - goroutine table
//! - `allocations` - allocations by kind
//! - `status` - totals and probe latency
//! - `layout` - which side panels fit the terminal
//! - `theme` - colors

// TUI rendering intentionally uses precision-losing casts
#![allow(clippy::cast_precision_loss)]

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use xgotop_common::layout::Kind;
use xgotop_common::EventType;

mod allocations;
mod goroutines;
pub mod layout; // Public for testing
mod status;
mod theme;

use allocations::AllocationsPanel;
use goroutines::GoroutinesView;
use layout::{compute_layout, SidePanel};
use status::StatusPanel;
use theme::{CAUTION_AMBER, CRITICAL_RED, HUD_GREEN, INFO_DIM};

use crate::clock::monotonic_ns;
use crate::domain::Pid;
use crate::profiling::PipelineCounters;
use crate::tracker::{GoroutineStats, KindStats, Tracker};

const STYLE_HEADING: Style = Style::new().fg(HUD_GREEN).add_modifier(Modifier::BOLD);
const STYLE_DIM: Style = Style::new().fg(INFO_DIM);
const STYLE_KEY: Style = Style::new().fg(CAUTION_AMBER);

/// How often the tracker is sampled and the screen redrawn
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Most goroutines copied out of the tracker per refresh
const MAX_ROWS: usize = 500;

/// Point-in-time copy of everything the panels draw
#[derive(Debug, Default)]
pub struct LiveSnapshot {
    pub live: usize,
    pub created: u64,
    pub exited: u64,
    pub total_events: u64,
    pub per_type: [u64; EventType::ALL.len()],
    pub mean_handler_ns: Option<u64>,
    pub mean_lifetime_ns: Option<u64>,
    pub goroutines: Vec<GoroutineStats>,
    pub kinds: Vec<(Kind, KindStats)>,
    pub total_allocated: KindStats,
    /// Newest event timestamp (`CLOCK_MONOTONIC` ns)
    pub last_ts: u64,
    /// Events read but not yet processed
    pub waiting: u64,
}

impl LiveSnapshot {
    #[must_use]
    pub fn capture(tracker: &Tracker, counters: &PipelineCounters) -> Self {
        Self {
            live: tracker.live(),
            created: tracker.created(),
            exited: tracker.exited(),
            total_events: tracker.total_events(),
            per_type: EventType::ALL.map(|ty| tracker.event_count(ty)),
            mean_handler_ns: tracker.mean_handler_ns(),
            mean_lifetime_ns: tracker.mean_lifetime_ns(),
            goroutines: tracker.top_goroutines(MAX_ROWS),
            kinds: tracker.kinds(),
            total_allocated: tracker.total_allocated(),
            last_ts: tracker.last_timestamp_ns(),
            waiting: counters.waiting(),
        }
    }
}

/// Live view state
struct LiveApp {
    goroutines: GoroutinesView,
    should_quit: bool,
}

impl LiveApp {
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers, rows: usize) {
        match code {
            KeyCode::Char('q' | 'Q') | KeyCode::Esc => self.should_quit = true,
            // Raw mode swallows SIGINT
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Up => self.goroutines.scroll_up(),
            KeyCode::Down => self.goroutines.scroll_down(rows),
            _ => {}
        }
    }
}

fn render_header(f: &mut Frame, area: Rect, snap: &LiveSnapshot, pid: Option<Pid>, elapsed: Duration) {
    let pid_display = pid.map_or_else(|| "ALL".to_string(), |p| p.0.to_string());
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { snap.total_events as f64 / secs } else { 0.0 };

    let mut spans = vec![
        Span::styled("XGOTOP", STYLE_HEADING),
        Span::styled(" | ", STYLE_DIM),
        Span::styled("[LIVE]", Style::new().fg(CRITICAL_RED).add_modifier(Modifier::BOLD)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("PID:{pid_display}"), Style::new().fg(HUD_GREEN)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("{secs:.1}s"), Style::new().fg(HUD_GREEN)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("{} evts", snap.total_events), Style::new().fg(CAUTION_AMBER)),
        Span::styled(format!(" ({rate:.0}/s)"), STYLE_DIM),
    ];
    if snap.last_ts > 0 {
        let lag_ms = monotonic_ns().saturating_sub(snap.last_ts) / 1_000_000;
        spans.push(Span::styled(" | ", STYLE_DIM));
        spans.push(Span::styled(format!("lag {lag_ms}ms"), STYLE_DIM));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(CRITICAL_RED)));
    f.render_widget(header, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, has_events: bool) {
    let mode_indicator = if has_events {
        Span::styled("[Live]", Style::new().fg(CRITICAL_RED))
    } else {
        Span::styled("[Waiting]", STYLE_DIM)
    };
    let status_line = Line::from(vec![
        Span::styled("Q", STYLE_KEY),
        Span::styled(":Quit ", STYLE_DIM),
        Span::styled("↑/↓", STYLE_KEY),
        Span::styled(":Scroll ", STYLE_DIM),
        mode_indicator,
    ]);
    let status = Paragraph::new(status_line)
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(HUD_GREEN)));
    f.render_widget(status, area);
}

fn render(f: &mut Frame, app: &LiveApp, snap: &LiveSnapshot, pid: Option<Pid>, elapsed: Duration) {
    let area = f.area();
    let config = compute_layout(area.width, area.height);

    let mut rows = vec![Constraint::Length(3), Constraint::Min(0)];
    if config.show_status_bar {
        rows.push(Constraint::Length(3));
    }
    let outer = Layout::default().direction(Direction::Vertical).constraints(rows).split(area);

    render_header(f, outer[0], snap, pid, elapsed);

    let table_area = if config.side == SidePanel::Hidden {
        outer[1]
    } else {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(config.columns())
            .split(outer[1]);

        if config.side == SidePanel::StatusAndAllocations {
            let left = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(18), Constraint::Min(0)])
                .split(cols[0]);
            StatusPanel::render(f, left[0], snap);
            AllocationsPanel::render(f, left[1], snap);
        } else {
            StatusPanel::render(f, cols[0], snap);
        }
        cols[1]
    };
    app.goroutines.render(f, table_area, snap);

    if config.show_status_bar {
        render_status_bar(f, outer[2], snap.total_events > 0);
    }
}

/// Run the live view until the user quits or `stop` is raised elsewhere
///
/// Quitting raises `stop` so the tracing loop shuts down too.
///
/// # Errors
/// Returns an error if terminal setup or rendering fails
pub fn run_live(
    tracker: Arc<Mutex<Tracker>>,
    counters: Arc<PipelineCounters>,
    pid: Option<Pid>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = live_loop(&mut terminal, &tracker, &counters, pid, &stop);

    // Restore the terminal even when drawing failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    stop.store(true, Ordering::Relaxed);
    result
}

fn live_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    tracker: &Mutex<Tracker>,
    counters: &PipelineCounters,
    pid: Option<Pid>,
    stop: &AtomicBool,
) -> Result<()> {
    let started = Instant::now();
    let mut app = LiveApp { goroutines: GoroutinesView::default(), should_quit: false };
    let mut snap = LiveSnapshot::default();
    let mut last_update: Option<Instant> = None;

    while !app.should_quit && !stop.load(Ordering::Relaxed) {
        if last_update.map_or(true, |t| t.elapsed() >= REFRESH_INTERVAL) {
            snap = {
                let tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
                LiveSnapshot::capture(&tracker, counters)
            };
            app.goroutines.clamp(snap.goroutines.len());
            last_update = Some(Instant::now());
        }

        terminal.draw(|f| render(f, &app, &snap, pid, started.elapsed()))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code, key.modifiers, snap.goroutines.len());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use xgotop_common::GoRuntimeEvent;

    fn tracker_with_events() -> Tracker {
        let mut tracker = Tracker::new();
        tracker.apply(&GoRuntimeEvent::stamped(EventType::GoroutineCreated, 0, 10, 2, 1, [1, 2, 0, 0, 0]));
        tracker.apply(&GoRuntimeEvent::stamped(EventType::AllocateMap, 10, 20, 2, 1, [16, 24, 8, 2, 10]));
        tracker
    }

    #[test]
    fn test_snapshot_copies_tracker() {
        let snap = LiveSnapshot::capture(&tracker_with_events(), &PipelineCounters::default());
        assert_eq!(snap.created, 1);
        assert_eq!(snap.per_type[EventType::AllocateMap as usize], 1);
        assert_eq!(snap.goroutines.len(), 1);
        assert_eq!(snap.total_allocated.bytes, 240);
    }

    #[test]
    fn test_render_full_layout() {
        let snap = LiveSnapshot::capture(&tracker_with_events(), &PipelineCounters::default());
        let app = LiveApp { goroutines: GoroutinesView::default(), should_quit: false };
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| render(f, &app, &snap, Some(Pid(42)), Duration::from_secs(1))).unwrap();

        let text: String =
            terminal.backend().buffer().content().iter().map(ratatui::buffer::Cell::symbol).collect();
        assert!(text.contains("PID:42"));
        assert!(text.contains("G2"));
        assert!(text.contains("map[K]V"));
    }

    #[test]
    fn test_quit_keys() {
        let mut app = LiveApp { goroutines: GoroutinesView::default(), should_quit: false };
        app.handle_key(KeyCode::Char('c'), KeyModifiers::NONE, 0);
        assert!(!app.should_quit);
        app.handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL, 0);
        assert!(app.should_quit);
    }
}
