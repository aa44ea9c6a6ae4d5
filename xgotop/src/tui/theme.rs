//! TUI color theme

use ratatui::style::Color;

pub const HUD_GREEN: Color = Color::Rgb(0, 255, 0);
pub const CRITICAL_RED: Color = Color::Rgb(255, 0, 0);
pub const CAUTION_AMBER: Color = Color::Rgb(255, 191, 0);
pub const INFO_DIM: Color = Color::Rgb(0, 180, 0);
pub const GO_CYAN: Color = Color::Rgb(0, 173, 216);

/// Color of a goroutine status column
#[must_use]
pub fn status_color(status: Option<u32>) -> Color {
    use xgotop_common::layout::{G_RUNNABLE, G_RUNNING, G_SCAN, G_SYSCALL, G_WAITING};

    match status.map(|s| s & !G_SCAN) {
        Some(G_RUNNING) => HUD_GREEN,
        Some(G_RUNNABLE) => GO_CYAN,
        Some(G_SYSCALL) => CAUTION_AMBER,
        Some(G_WAITING) | None => INFO_DIM,
        Some(_) => CRITICAL_RED,
    }
}

/// Fixed-width bar for a 0-100 share, e.g. `[|||||     ]`
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn gauge_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "|".repeat(filled), " ".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_bar() {
        assert_eq!(gauge_bar(0.0, 4), "[    ]");
        assert_eq!(gauge_bar(50.0, 4), "[||  ]");
        assert_eq!(gauge_bar(250.0, 4), "[||||]");
    }
}
