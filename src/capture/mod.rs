//! Full-page tile capture engine.
//!
//! The capture loop is strictly sequential: scroll position and the
//! privileged capture API are singleton per-tab resources, so each tile's
//! scroll -> settle -> capture -> record step completes before the next
//! begins. Scroll position and overflow styles are restored through an RAII
//! guard, so restoration runs even when a tile capture fails mid-session.

pub mod stitch;
pub mod tiler;

use std::sync::Arc;

use image::RgbaImage;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::inline;
use crate::page::dom::{Dom, Surface};
use crate::protocol::MessageSender;
use crate::ToolConfig;

use stitch::{Stitcher, TileImage};
use tiler::plan_tiles;

/// Records scroll position and overflow styles on acquisition, hides the
/// tool's own surface, and restores everything on drop. Some pages override
/// `overflow-y` in ways that break programmatic scrolling, so document
/// overflow is forced to `hidden` and the body's `overflow-y` to `visible`
/// for the duration of the session.
struct ScrollGuard {
    dom: Arc<dyn Dom>,
    surface: Arc<dyn Surface>,
    scroll_x: i64,
    scroll_y: i64,
    document_overflow: String,
    body_overflow_y: String,
}

impl ScrollGuard {
    fn acquire(dom: Arc<dyn Dom>, surface: Arc<dyn Surface>) -> Self {
        let (scroll_x, scroll_y) = dom.scroll_position();
        let document_overflow = dom.document_overflow();
        let body_overflow_y = dom.body_overflow_y();

        surface.hide();
        dom.set_body_overflow_y("visible");
        dom.set_document_overflow("hidden");

        ScrollGuard {
            dom,
            surface,
            scroll_x,
            scroll_y,
            document_overflow,
            body_overflow_y,
        }
    }
}

impl Drop for ScrollGuard {
    fn drop(&mut self) {
        self.dom.set_document_overflow(&self.document_overflow);
        self.dom.set_body_overflow_y(&self.body_overflow_y);
        self.dom.scroll_to(self.scroll_x, self.scroll_y);
        self.surface.show();
    }
}

/// One full-page capture session over a live page.
pub struct CaptureSession {
    dom: Arc<dyn Dom>,
    surface: Arc<dyn Surface>,
    sender: MessageSender,
    config: ToolConfig,
}

impl CaptureSession {
    pub fn new(
        dom: Arc<dyn Dom>,
        surface: Arc<dyn Surface>,
        sender: MessageSender,
        config: ToolConfig,
    ) -> Self {
        CaptureSession {
            dom,
            surface,
            sender,
            config,
        }
    }

    /// Capture the full scrollable page as one stitched raster.
    pub async fn capture_full_page(&self) -> Result<RgbaImage> {
        let viewport = self.dom.viewport();
        let plan = plan_tiles(&self.dom.metrics(), viewport, self.config.top_padding);
        debug!(
            "capturing {} tiles for a {}x{} page",
            plan.tiles.len(),
            plan.full_width,
            plan.full_height
        );

        let _guard = ScrollGuard::acquire(self.dom.clone(), self.surface.clone());
        self.run(&plan).await
    }

    async fn run(&self, plan: &tiler::TilePlan) -> Result<RgbaImage> {
        let mut stitcher = Stitcher::new(plan);
        for tile in &plan.tiles {
            // The tile sequence is fixed for the session; a viewport that
            // changed underneath it is a detected failure, not a re-tile.
            if self.dom.viewport() != plan.viewport {
                return Err(Error::Capture("page resized during capture".into()));
            }

            self.dom.scroll_to(tile.offset_x, tile.offset_y);
            tokio::time::sleep(self.config.settle_delay).await;

            let data = self.capture_tile().await?;
            let (captured_scroll_x, captured_scroll_y) = self.dom.scroll_position();
            let raster = inline::decode_image(&data)?;
            debug!(
                "tile ({}, {}) captured at ({}, {}), raster {}x{}",
                tile.offset_x,
                tile.offset_y,
                captured_scroll_x,
                captured_scroll_y,
                raster.width(),
                raster.height()
            );

            stitcher.add(&TileImage {
                tile: *tile,
                raster,
                captured_scroll_x,
                captured_scroll_y,
            })?;
        }
        stitcher.finish()
    }

    /// One tile round-trip, with a single bounded retry after a fresh settle
    /// delay when enabled.
    async fn capture_tile(&self) -> Result<String> {
        match self.sender.capture_visible_tab().await {
            Ok(data) => Ok(data),
            Err(err) if self.config.retry_failed_tile => {
                warn!("tile capture failed, retrying once: {}", err);
                tokio::time::sleep(self.config.settle_delay).await;
                self.sender.capture_visible_tab().await
            }
            Err(err) => Err(err),
        }
    }
}
