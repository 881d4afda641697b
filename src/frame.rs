//! Overlay / frame presentation.
//!
//! Wraps a finished capture in a decorative frame (background fill,
//! rounded-rectangle clip, inset padding) and exposes the copy and download
//! actions. Frame options load once at construction, change on every input
//! tick, and persist only on commit so a drag gesture does not amplify into
//! a storage write per tick.

use std::io::Cursor;
use std::sync::Arc;

use image::{imageops, ImageFormat, Rgba, RgbaImage};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::platform::{Clipboard, HostActions, KvStore, StorageValue};

const FRAME_OPTIONS_KEY: &str = "frameOptions";
const DOWNLOAD_TYPE_KEY: &str = "downloadOption";

/// Base name for downloaded captures; the extension follows the image type.
pub const DOWNLOAD_BASENAME: &str = "screenshot";

/// Ceiling for the frame padding. The persisted value is writable outside
/// the tool, so an absurd stored padding must not blow up canvas allocation.
const MAX_PADDING: u32 = 100;

/// User-adjustable frame decoration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameOptions {
    pub padding: u32,
    pub frame_color: String,
    pub border_radius: u32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        FrameOptions {
            padding: 20,
            frame_color: "#FFFFFF".to_string(),
            border_radius: 8,
        }
    }
}

/// Export encodings offered for download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    #[default]
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/webp")]
    Webp,
}

impl ImageType {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Png => "image/png",
            ImageType::Jpeg => "image/jpeg",
            ImageType::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageType::Png => "png",
            ImageType::Jpeg => "jpg",
            ImageType::Webp => "webp",
        }
    }
}

fn parse_hex_color(color: &str) -> Option<Rgba<u8>> {
    let hex = color.strip_prefix('#')?;
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some(Rgba([r, g, b, 255]))
        }
        3 => {
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 1], 16)
                    .ok()
                    .map(|v| v * 17)
            };
            Some(Rgba([channel(0)?, channel(1)?, channel(2)?, 255]))
        }
        _ => None,
    }
}

fn inside_rounded_rect(x: u32, y: u32, width: u32, height: u32, radius: u32) -> bool {
    let r = radius.min(width / 2).min(height / 2) as f64;
    if r <= 0.0 {
        return true;
    }
    let (x, y) = (x as f64 + 0.5, y as f64 + 0.5);
    let (w, h) = (width as f64, height as f64);
    let cx = if x < r {
        Some(r)
    } else if x > w - r {
        Some(w - r)
    } else {
        None
    };
    let cy = if y < r {
        Some(r)
    } else if y > h - r {
        Some(h - r)
    } else {
        None
    };
    match (cx, cy) {
        (Some(cx), Some(cy)) => (x - cx).powi(2) + (y - cy).powi(2) <= r * r,
        _ => true,
    }
}

/// Render the decorated frame: rounded background fill, screenshot inset by
/// the padding. Corners outside the radius stay transparent.
pub fn render_frame(screenshot: &RgbaImage, options: &FrameOptions) -> RgbaImage {
    let padding = options.padding.min(MAX_PADDING);
    let width = screenshot.width() + padding * 2;
    let height = screenshot.height() + padding * 2;
    let fill = parse_hex_color(&options.frame_color).unwrap_or(Rgba([255, 255, 255, 255]));

    let mut canvas = RgbaImage::from_fn(width, height, |x, y| {
        if inside_rounded_rect(x, y, width, height, options.border_radius) {
            fill
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    imageops::replace(&mut canvas, screenshot, padding as i64, padding as i64);
    canvas
}

fn encode_as(image: &RgbaImage, kind: ImageType) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match kind {
        ImageType::Png => image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        ImageType::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
        }
        ImageType::Webp => image.write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)?,
    }
    Ok(out)
}

/// The persistent preference cells the overlay reads and writes. Built once
/// per session so repeated captures share the same store subscriptions.
pub struct FrameStorage {
    pub options: Arc<StorageValue<FrameOptions>>,
    pub download_type: Arc<StorageValue<ImageType>>,
}

impl FrameStorage {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        FrameStorage {
            options: Arc::new(StorageValue::new(
                store.clone(),
                FRAME_OPTIONS_KEY,
                FrameOptions::default(),
            )),
            download_type: Arc::new(StorageValue::new(
                store,
                DOWNLOAD_TYPE_KEY,
                ImageType::default(),
            )),
        }
    }
}

/// Owns the finished bitmap and its decoration state.
pub struct FrameController {
    screenshot: RgbaImage,
    options: FrameOptions,
    stored_options: Arc<StorageValue<FrameOptions>>,
    download_type: Arc<StorageValue<ImageType>>,
    clipboard: Arc<dyn Clipboard>,
    host: Arc<dyn HostActions>,
}

impl FrameController {
    /// Takes ownership of the stitched bitmap and loads the persisted frame
    /// options once.
    pub fn new(
        screenshot: RgbaImage,
        storage: &FrameStorage,
        clipboard: Arc<dyn Clipboard>,
        host: Arc<dyn HostActions>,
    ) -> Self {
        let stored_options = storage.options.clone();
        let download_type = storage.download_type.clone();
        let options = stored_options.get();
        FrameController {
            screenshot,
            options,
            stored_options,
            download_type,
            clipboard,
            host,
        }
    }

    pub fn options(&self) -> &FrameOptions {
        &self.options
    }

    /// Apply one option change from a control input. The value is accepted
    /// only when its JSON type matches the existing option's type; a
    /// mismatch is ignored and the current value stands.
    pub fn set_option(&mut self, key: &str, value: serde_json::Value) {
        let mut raw = match serde_json::to_value(&self.options) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return,
        };
        let matches_type = raw
            .get(key)
            .map(|existing| {
                std::mem::discriminant(existing) == std::mem::discriminant(&value)
            })
            .unwrap_or(false);
        if !matches_type {
            return;
        }
        raw.insert(key.to_string(), value);
        if let Ok(updated) = serde_json::from_value(serde_json::Value::Object(raw)) {
            self.options = updated;
        }
    }

    /// Redraw the decorated canvas with the current options.
    pub fn draw(&self) -> RgbaImage {
        render_frame(&self.screenshot, &self.options)
    }

    /// Persist the current options (called on input commit, not per tick).
    pub fn commit(&self) {
        self.stored_options.set(self.options.clone());
    }

    /// Serialize the decorated canvas to PNG and write it to the clipboard.
    /// A write failure is reported, never propagated.
    pub fn copy_to_clipboard(&self) {
        let png = match crate::inline::encode_png(&self.draw()) {
            Ok(png) => png,
            Err(err) => {
                warn!("could not encode clipboard image: {}", err);
                return;
            }
        };
        if let Err(err) = self.clipboard.write_image(&png) {
            warn!("clipboard write failed: {}", err);
        }
    }

    /// Hand the decorated canvas to the host's download action, encoded per
    /// the persisted download type preference.
    pub async fn download(&self) -> Result<()> {
        let kind = self.download_type.get();
        let bytes = encode_as(&self.draw(), kind)?;
        let filename = format!("{}.{}", DOWNLOAD_BASENAME, kind.extension());
        self.host
            .download(&filename, kind.mime(), bytes)
            .await
            .map_err(|e| crate::error::Error::Other(e.to_string()))
    }
}
