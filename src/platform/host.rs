//! Host action surfaces supplied by the embedding extension.
//!
//! These are fire-and-forget or one-shot capabilities the core consumes but
//! does not implement: opening the options page, saving a file, writing to
//! the clipboard, and taking a one-shot raster of the visible viewport. Noop
//! implementations keep tests and partial embeddings working.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use image::RgbaImage;
use log::debug;

use crate::inline;
use crate::protocol::HandlerError;

/// Fire-and-forget commands routed to the host.
#[async_trait]
pub trait HostActions: Send + Sync {
    /// Open the host's options surface.
    async fn show_options(&self) -> Result<(), HandlerError>;

    /// Hand a finished image to the host's download action.
    async fn download(&self, filename: &str, mime: &str, bytes: Vec<u8>) -> Result<(), HandlerError>;
}

/// Platform clipboard. Write failures are reported by the caller, never
/// propagated into the capture result.
pub trait Clipboard: Send + Sync {
    fn write_image(&self, png: &[u8]) -> Result<(), HandlerError>;
}

/// One-shot screenshot of the currently visible viewport, produced by the
/// privileged capture API. The raster may be larger than the CSS viewport
/// when the device pixel ratio is above 1.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Returns inline image data for the visible viewport.
    async fn capture_visible(&self) -> Result<String, HandlerError>;
}

#[derive(Default)]
pub struct NoopHost {
    options_opened: AtomicUsize,
    downloads: AtomicUsize,
}

impl NoopHost {
    pub fn new() -> Self {
        NoopHost::default()
    }

    pub fn options_opened(&self) -> usize {
        self.options_opened.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostActions for NoopHost {
    async fn show_options(&self) -> Result<(), HandlerError> {
        self.options_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self, filename: &str, mime: &str, bytes: Vec<u8>) -> Result<(), HandlerError> {
        debug!("noop download: {} ({}, {} bytes)", filename, mime, bytes.len());
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopClipboard {
    writes: AtomicUsize,
}

impl NoopClipboard {
    pub fn new() -> Self {
        NoopClipboard::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Clipboard for NoopClipboard {
    fn write_image(&self, _png: &[u8]) -> Result<(), HandlerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Capture backend that always returns a 1x1 white pixel.
pub struct NoopCapture;

#[async_trait]
impl CaptureBackend for NoopCapture {
    async fn capture_visible(&self) -> Result<String, HandlerError> {
        let mut img = RgbaImage::new(1, 1);
        img.put_pixel(0, 0, image::Rgba([255, 255, 255, 255]));
        inline::encode_png_data_url(&img).map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_capture_yields_decodable_inline_data() {
        let data = NoopCapture.capture_visible().await.unwrap();
        let img = crate::inline::decode_image(&data).unwrap();
        assert_eq!(img.dimensions(), (1, 1));
    }

    #[tokio::test]
    async fn noop_host_counts_actions() {
        let host = NoopHost::new();
        host.show_options().await.unwrap();
        host.download("screenshot.png", "image/png", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(host.options_opened(), 1);
        assert_eq!(host.downloads(), 1);
    }
}
