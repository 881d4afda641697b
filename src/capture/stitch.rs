//! Tile compositing.
//!
//! Capture rasters may come back at a different pixel resolution than the
//! CSS viewport (device-pixel-ratio scaling, or the capture API's own
//! scaling). The stitcher infers one uniform scale from the first tile and
//! applies it to every recorded offset and to the canvas dimensions. The
//! canvas only ever grows; a later tile reporting a larger scaled size never
//! shrinks earlier work.

use image::{imageops, RgbaImage};
use log::debug;

use crate::capture::tiler::{Tile, TilePlan};
use crate::error::{Error, Result};

/// One captured raster plus the actual scroll position the environment
/// reported after the scroll request (post-clamp, possibly different from
/// the requested tile offsets).
#[derive(Debug, Clone)]
pub struct TileImage {
    pub tile: Tile,
    pub raster: RgbaImage,
    pub captured_scroll_x: i64,
    pub captured_scroll_y: i64,
}

/// Incremental compositor for one capture session.
pub struct Stitcher {
    full_width: i64,
    full_height: i64,
    viewport_width: i64,
    scale: Option<f64>,
    canvas: Option<RgbaImage>,
}

impl Stitcher {
    pub fn new(plan: &TilePlan) -> Self {
        Stitcher {
            full_width: plan.full_width,
            full_height: plan.full_height,
            viewport_width: plan.viewport.width as i64,
            scale: None,
            canvas: None,
        }
    }

    /// Uniform raster-to-CSS scale, fixed by the first tile.
    fn scale_for(&mut self, raster_width: u32) -> f64 {
        *self.scale.get_or_insert_with(|| {
            if self.viewport_width > 0 {
                raster_width as f64 / self.viewport_width as f64
            } else {
                1.0
            }
        })
    }

    fn ensure_canvas(&mut self, width: u32, height: u32) {
        match &mut self.canvas {
            None => {
                self.canvas = Some(RgbaImage::new(width.max(1), height.max(1)));
            }
            Some(canvas) => {
                if width > canvas.width() || height > canvas.height() {
                    let new_w = width.max(canvas.width());
                    let new_h = height.max(canvas.height());
                    debug!(
                        "growing canvas {}x{} -> {}x{}",
                        canvas.width(),
                        canvas.height(),
                        new_w,
                        new_h
                    );
                    let mut grown = RgbaImage::new(new_w, new_h);
                    imageops::replace(&mut grown, canvas, 0, 0);
                    *canvas = grown;
                }
            }
        }
    }

    /// Draw one captured tile at its scaled actual scroll offset.
    pub fn add(&mut self, tile: &TileImage) -> Result<()> {
        let scale = self.scale_for(tile.raster.width());
        let x = (tile.captured_scroll_x as f64 * scale).round() as i64;
        let y = (tile.captured_scroll_y as f64 * scale).round() as i64;

        let target_w = (self.full_width as f64 * scale).round() as u32;
        let target_h = (self.full_height as f64 * scale).round() as u32;
        self.ensure_canvas(target_w, target_h);
        // A tile can still land outside the allocated target when the
        // environment reported offsets past the inferred page size.
        self.ensure_canvas(
            (x.max(0) as u32).saturating_add(tile.raster.width()),
            (y.max(0) as u32).saturating_add(tile.raster.height()),
        );

        let canvas = self
            .canvas
            .as_mut()
            .ok_or_else(|| Error::Capture("canvas unallocated".into()))?;
        imageops::replace(canvas, &tile.raster, x, y);
        Ok(())
    }

    /// The final composited bitmap; read-only from here on.
    pub fn finish(self) -> Result<RgbaImage> {
        self.canvas
            .ok_or_else(|| Error::Capture("no tiles were composited".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tiler::plan_tiles;
    use crate::page::dom::PageMetrics;
    use crate::Viewport;
    use image::Rgba;
    use sha2::{Digest, Sha256};

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    fn plan(full_w: i64, full_h: i64, vw: u32, vh: u32) -> TilePlan {
        let metrics = PageMetrics {
            root_scroll_width: full_w,
            root_scroll_height: full_h,
            ..PageMetrics::default()
        };
        plan_tiles(&metrics, Viewport { width: vw, height: vh }, 200)
    }

    #[test]
    fn composites_at_actual_scroll_offsets() {
        let plan = plan(100, 250, 100, 100);
        let mut stitcher = Stitcher::new(&plan);
        // Bottom-anchored rows: requested y = 150, 50, -50; the environment
        // clamps the last one to 0.
        for (req, actual, color) in [
            (150, 150, [1u8, 0, 0, 255]),
            (50, 50, [2, 0, 0, 255]),
            (-50, 0, [3, 0, 0, 255]),
        ] {
            stitcher
                .add(&TileImage {
                    tile: Tile {
                        offset_x: 0,
                        offset_y: req,
                    },
                    raster: solid(100, 100, color),
                    captured_scroll_x: 0,
                    captured_scroll_y: actual,
                })
                .unwrap();
        }
        let canvas = stitcher.finish().unwrap();
        assert_eq!(canvas.dimensions(), (100, 250));
        // Later tiles overwrite earlier ones where they overlap.
        assert_eq!(canvas.get_pixel(50, 240), &Rgba([1, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(50, 120), &Rgba([2, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(50, 10), &Rgba([3, 0, 0, 255]));
    }

    #[test]
    fn first_tile_fixes_a_uniform_scale() {
        // 2x device pixel ratio: rasters are 200px wide for a 100px viewport.
        let plan = plan(100, 250, 100, 100);
        let mut stitcher = Stitcher::new(&plan);
        stitcher
            .add(&TileImage {
                tile: Tile {
                    offset_x: 0,
                    offset_y: 150,
                },
                raster: solid(200, 200, [9, 9, 9, 255]),
                captured_scroll_x: 0,
                captured_scroll_y: 150,
            })
            .unwrap();
        let canvas = stitcher.finish().unwrap();
        assert_eq!(canvas.dimensions(), (200, 500));
        // Offset 150 lands at 300 in raster pixels.
        assert_eq!(canvas.get_pixel(0, 300), &Rgba([9, 9, 9, 255]));
        assert_eq!(canvas.get_pixel(0, 299), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn canvas_grows_but_never_shrinks() {
        let plan = plan(100, 100, 100, 100);
        let mut stitcher = Stitcher::new(&plan);
        stitcher
            .add(&TileImage {
                tile: Tile {
                    offset_x: 0,
                    offset_y: 0,
                },
                raster: solid(100, 100, [1, 1, 1, 255]),
                captured_scroll_x: 0,
                captured_scroll_y: 0,
            })
            .unwrap();
        // A stray tile beyond the inferred page size forces growth.
        stitcher
            .add(&TileImage {
                tile: Tile {
                    offset_x: 0,
                    offset_y: 40,
                },
                raster: solid(100, 100, [2, 2, 2, 255]),
                captured_scroll_x: 0,
                captured_scroll_y: 40,
            })
            .unwrap();
        let canvas = stitcher.finish().unwrap();
        assert_eq!(canvas.dimensions(), (100, 140));
        assert_eq!(canvas.get_pixel(0, 0), &Rgba([1, 1, 1, 255]));
        assert_eq!(canvas.get_pixel(0, 139), &Rgba([2, 2, 2, 255]));
    }

    #[test]
    fn empty_session_is_an_error() {
        let plan = plan(100, 100, 100, 100);
        assert!(Stitcher::new(&plan).finish().is_err());
    }

    #[test]
    fn stitched_output_is_deterministic() {
        let digest_of_run = || {
            let plan = plan(200, 500, 200, 200);
            let mut stitcher = Stitcher::new(&plan);
            for tile in plan.tiles.clone() {
                let actual_y = tile.offset_y.clamp(0, 300);
                stitcher
                    .add(&TileImage {
                        tile,
                        raster: solid(200, 200, [actual_y as u8, 7, 7, 255]),
                        captured_scroll_x: tile.offset_x,
                        captured_scroll_y: actual_y,
                    })
                    .unwrap();
            }
            let canvas = stitcher.finish().unwrap();
            hex::encode(Sha256::digest(canvas.as_raw()))
        };
        assert_eq!(digest_of_run(), digest_of_run());
    }
}
