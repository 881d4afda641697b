//! Scroll tiling for full-page capture.
//!
//! Page dimensions are inferred from five inconsistent browser-reported
//! sources per axis (the maximum wins, see [`PageMetrics`]), then the page is
//! covered with viewport-sized tiles. Rows are bottom-anchored and overlap by
//! the top padding, so the last row always ends exactly at the page bottom
//! instead of overshooting, and a reserved top band keeps browser-chrome
//! artifacts out of tile seams.

use crate::page::dom::PageMetrics;
use crate::Viewport;

/// One scroll position at which a raster capture is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub offset_x: i64,
    pub offset_y: i64,
}

/// The ordered tile sequence for one capture session, computed once before
/// any scrolling begins and never recomputed mid-session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlan {
    pub tiles: Vec<Tile>,
    pub full_width: i64,
    pub full_height: i64,
    pub viewport: Viewport,
}

/// Compute the tile sequence for a page.
///
/// `top_padding` shrinks the vertical step (not the tile) so consecutive rows
/// overlap; a viewport taller than the padding steps by `height - padding`,
/// anything smaller steps by the full height. A full width within 1px of the
/// viewport width is clamped to exactly the viewport width so rounding can
/// not produce a spurious 1-pixel-wide extra column.
pub fn plan_tiles(metrics: &PageMetrics, viewport: Viewport, top_padding: i64) -> TilePlan {
    let viewport_width = viewport.width as i64;
    let viewport_height = viewport.height as i64;

    let mut full_width = metrics.full_width();
    let full_height = metrics.full_height();

    let step_y = if viewport_height > top_padding {
        viewport_height - top_padding
    } else {
        viewport_height
    }
    .max(1);
    let step_x = viewport_width.max(1);

    if full_width <= viewport_width + 1 {
        full_width = viewport_width;
    }

    let mut tiles = Vec::new();
    let mut y = full_height - viewport_height;
    while y > -step_y {
        let mut x = 0;
        while x < full_width {
            tiles.push(Tile {
                offset_x: x,
                offset_y: y,
            });
            x += step_x;
        }
        y -= step_y;
    }

    TilePlan {
        tiles,
        full_width,
        full_height,
        viewport,
    }
}
