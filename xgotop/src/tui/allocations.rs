//! Allocations panel - heap requests grouped by Go kind.
//!
//! ```text
//! [ ALLOCATIONS ]
//! map[K]V    [|||||     ] 48%   1.2 MiB
//! []T        [|||       ] 31%   790 KiB
//! struct{}   [|         ] 12%   310 KiB
//! ```
//!
//! Objects count under their own kind; slices and maps under `[]T` and
//! `map[K]V` with their estimated backing size.

use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::theme::{gauge_bar, CAUTION_AMBER, GO_CYAN, HUD_GREEN, INFO_DIM};
use super::LiveSnapshot;
use crate::profiling::format_bytes;

pub struct AllocationsPanel;

impl AllocationsPanel {
    #[allow(clippy::cast_precision_loss)]
    pub fn render(f: &mut Frame, area: Rect, snap: &LiveSnapshot) {
        let total = snap.total_allocated.bytes.max(1) as f64;
        let visible = usize::from(area.height.saturating_sub(3));

        let mut lines = vec![Line::from(vec![
            Span::styled(" total ", Style::default().fg(INFO_DIM)),
            Span::styled(
                format!(
                    "{} in {} allocs",
                    format_bytes(snap.total_allocated.bytes),
                    snap.total_allocated.count
                ),
                Style::default().fg(CAUTION_AMBER),
            ),
        ])];

        for (kind, stats) in snap.kinds.iter().take(visible) {
            let pct = stats.bytes as f64 / total * 100.0;
            lines.push(Line::from(vec![
                Span::styled(format!(" {:<14}", kind.go_name()), Style::default().fg(GO_CYAN)),
                Span::styled(gauge_bar(pct, 10), Style::default().fg(HUD_GREEN)),
                Span::styled(format!(" {pct:>3.0}% "), Style::default().fg(HUD_GREEN)),
                Span::styled(format_bytes(stats.bytes), Style::default().fg(INFO_DIM)),
            ]));
        }

        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Allocations")
                .border_style(Style::default().fg(HUD_GREEN)),
        );
        f.render_widget(paragraph, area);
    }
}
