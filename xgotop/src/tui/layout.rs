//! Which panels fit next to the goroutine table.
//!
//! The table always gets the space; the side column (status, then the
//! allocations breakdown) and the key hint bar come and go with the
//! terminal size.

use ratatui::layout::Constraint;

/// Narrower than this and the side column is dropped
const MIN_SIDE_WIDTH: u16 = 60;
/// Up to this width the side column takes 30% instead of 35%
const NARROW_WIDTH: u16 = 100;
/// Status panel, header and hint bar need this many rows
const MIN_SIDE_HEIGHT: u16 = 16;
/// The allocations panel goes below its 18 rows plus header and hints
const MIN_ALLOCATIONS_HEIGHT: u16 = 25;

/// What the side column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePanel {
    Hidden,
    Status,
    StatusAndAllocations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveLayout {
    pub side: SidePanel,
    /// Width share of the side column
    pub side_pct: u16,
    pub show_status_bar: bool,
}

impl LiveLayout {
    /// Side column, then goroutine table
    #[must_use]
    pub fn columns(&self) -> [Constraint; 2] {
        [Constraint::Percentage(self.side_pct), Constraint::Percentage(100 - self.side_pct)]
    }
}

#[must_use]
pub fn compute_layout(width: u16, height: u16) -> LiveLayout {
    let side = if width < MIN_SIDE_WIDTH || height < MIN_SIDE_HEIGHT {
        SidePanel::Hidden
    } else if height < MIN_ALLOCATIONS_HEIGHT {
        SidePanel::Status
    } else {
        SidePanel::StatusAndAllocations
    };

    LiveLayout {
        side,
        side_pct: if width <= NARROW_WIDTH { 30 } else { 35 },
        show_status_bar: height >= MIN_SIDE_HEIGHT,
    }
}
