//! Goroutine table, heaviest allocators first.

use ratatui::{
    layout::{Constraint, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Cell, Row, Table},
    Frame,
};
use xgotop_common::layout::status_name;

use super::theme::{status_color, CAUTION_AMBER, HUD_GREEN, INFO_DIM};
use super::LiveSnapshot;
use crate::domain::GoroutineId;
use crate::profiling::format_bytes;

/// Scroll state of the table
#[derive(Debug, Default)]
pub struct GoroutinesView {
    offset: usize,
}

impl GoroutinesView {
    pub fn scroll_up(&mut self) {
        self.offset = self.offset.saturating_sub(1);
    }

    pub fn scroll_down(&mut self, rows: usize) {
        if self.offset + 1 < rows {
            self.offset += 1;
        }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Keep the offset inside a table that may have shrunk
    pub fn clamp(&mut self, rows: usize) {
        self.offset = self.offset.min(rows.saturating_sub(1));
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn render(&self, f: &mut Frame, area: Rect, snap: &LiveSnapshot) {
        let header = Row::new(["GOROUTINE", "PARENT", "STATUS", "ALLOCS", "BYTES", "AGE"])
            .style(Style::default().fg(CAUTION_AMBER).add_modifier(Modifier::BOLD));

        let rows = snap.goroutines.iter().skip(self.offset).map(|g| {
            let age = g.created_ns.map_or_else(
                || "-".to_string(),
                |born| format!("{:.1}s", snap.last_ts.saturating_sub(born) as f64 / 1e9),
            );
            let parent = parent_label(GoroutineId(g.parent));
            let status = g.status.map_or("?", status_name);
            Row::new([
                Cell::from(GoroutineId(g.id).to_string()).style(Style::default().fg(HUD_GREEN)),
                Cell::from(parent).style(Style::default().fg(INFO_DIM)),
                Cell::from(status).style(Style::default().fg(status_color(g.status))),
                Cell::from(g.allocations.count.to_string()),
                Cell::from(format_bytes(g.allocations.bytes)),
                Cell::from(age).style(Style::default().fg(INFO_DIM)),
            ])
        });

        let widths = [
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(15),
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Min(6),
        ];
        let title = format!("Goroutines ({} live)", snap.live);
        let table = Table::new(rows, widths).header(header).block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(HUD_GREEN)),
        );
        f.render_widget(table, area);
    }
}

fn parent_label(parent: GoroutineId) -> String {
    if parent.is_none() {
        "-".to_string()
    } else {
        parent.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_bounds() {
        let mut view = GoroutinesView::default();
        view.scroll_up();
        assert_eq!(view.offset(), 0);
        view.scroll_down(3);
        view.scroll_down(3);
        view.scroll_down(3);
        assert_eq!(view.offset(), 2);
        view.clamp(1);
        assert_eq!(view.offset(), 0);
    }

    #[test]
    fn test_parent_column() {
        assert_eq!(parent_label(GoroutineId(0)), "-");
        assert_eq!(parent_label(GoroutineId(17)), "G17");
    }
}
