use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use xgotop_common::EventType;

use super::theme::{CAUTION_AMBER, HUD_GREEN, INFO_DIM};
use super::LiveSnapshot;

/// Backlog above which the pipeline is flagged as lagging
const BACKLOG_WARNING: u64 = 100_000;

/// Goroutine and probe totals
pub struct StatusPanel;

impl StatusPanel {
    #[allow(clippy::cast_precision_loss)]
    pub fn render(f: &mut Frame, area: Rect, snap: &LiveSnapshot) {
        let backlogged = snap.waiting > BACKLOG_WARNING;
        let (status_text, status_color) = if backlogged {
            ("[!] BACKLOG", CAUTION_AMBER)
        } else {
            ("[-] NOMINAL", HUD_GREEN)
        };

        let row = |label: &str, value: String| {
            Line::from(vec![
                Span::styled(format!(" {label:<13}"), Style::default().fg(INFO_DIM)),
                Span::styled(value, Style::default().fg(HUD_GREEN)),
            ])
        };

        let mut lines = vec![
            Line::from(Span::styled(
                format!(" {status_text}"),
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            row("Live", snap.live.to_string()),
            row("Created", snap.created.to_string()),
            row("Exited", snap.exited.to_string()),
            row(
                "Lifetime",
                snap.mean_lifetime_ns
                    .map_or_else(|| "-".to_string(), |ns| format!("{:.2}ms", ns as f64 / 1e6)),
            ),
            row("Probe lat", snap.mean_handler_ns.map_or_else(|| "-".to_string(), |ns| format!("{ns}ns"))),
            row("Waiting", snap.waiting.to_string()),
            Line::from(""),
        ];

        for (event_type, count) in EventType::ALL.iter().zip(snap.per_type) {
            lines.push(row(event_type.name(), count.to_string()));
        }

        let border_color = if backlogged { CAUTION_AMBER } else { HUD_GREEN };
        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Status")
                .border_style(Style::default().fg(border_color)),
        );

        f.render_widget(paragraph, area);
    }
}
