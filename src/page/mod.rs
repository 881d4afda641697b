//! The restricted context: everything that runs inside the inspected page.
//!
//! A [`PageSession`] is the single owned session object for one tab. It owns
//! the message sender, the selection state machine, and the overlay, so
//! there is no ambient module-level state and the per-tab mutual exclusion
//! stays testable in isolation.

pub mod dom;
pub mod fetch;
pub mod selection;

use std::sync::Arc;

use image::RgbaImage;
use log::{debug, warn};

use crate::capture::CaptureSession;
use crate::error::Result;
use crate::frame::{FrameController, FrameStorage};
use crate::page::dom::{
    effective_background, zero_collapsing_margins, Dom, DomRenderer, ElementHandle, RenderOptions,
    Surface,
};
use crate::page::fetch::{HttpPageFetch, ImageProxyFetcher, PageFetch};
use crate::page::selection::{CaptureMode, SelectionController};
use crate::platform::{Clipboard, HostActions, KvStore, StorageValue};
use crate::protocol::MessageSender;
use crate::{TabId, ToolConfig};

const AUTO_DOWNLOAD_KEY: &str = "autoDownloadOption";

/// One capture-tool session on one tab.
pub struct PageSession {
    sender: MessageSender,
    dom: Arc<dyn Dom>,
    surface: Arc<dyn Surface>,
    renderer: Arc<dyn DomRenderer>,
    // Preference cells are built once per session; a capture never adds
    // store subscriptions of its own.
    frame_storage: FrameStorage,
    auto_download: StorageValue<bool>,
    clipboard: Arc<dyn Clipboard>,
    host: Arc<dyn HostActions>,
    page_fetch: Arc<dyn PageFetch>,
    selection: SelectionController,
    config: ToolConfig,
    tab_id: Option<TabId>,
    overlay: Option<FrameController>,
    closed: bool,
}

impl PageSession {
    /// Build a session and learn its own tab id from the privileged side.
    /// An unreachable privileged side leaves the id unknown; closing then
    /// skips the finished notification, like the original fire-and-forget
    /// lookup.
    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        sender: MessageSender,
        dom: Arc<dyn Dom>,
        surface: Arc<dyn Surface>,
        renderer: Arc<dyn DomRenderer>,
        store: Arc<dyn KvStore>,
        clipboard: Arc<dyn Clipboard>,
        host: Arc<dyn HostActions>,
        config: ToolConfig,
    ) -> Self {
        let tab_id = match sender.tab_id().await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!("could not resolve tab id: {}", err);
                None
            }
        };
        debug!("page session started on tab {:?}", tab_id);
        let selection = SelectionController::new(dom.clone(), surface.clone());
        let frame_storage = FrameStorage::new(store.clone());
        let auto_download = StorageValue::new(store, AUTO_DOWNLOAD_KEY, true);
        PageSession {
            sender,
            dom,
            surface,
            renderer,
            frame_storage,
            auto_download,
            clipboard,
            host,
            page_fetch: Arc::new(HttpPageFetch::new()),
            selection,
            config,
            tab_id,
            overlay: None,
            closed: false,
        }
    }

    /// Swap in a different page-side fetch capability (tests, embeddings
    /// with their own network stack).
    pub fn with_page_fetch(mut self, page_fetch: Arc<dyn PageFetch>) -> Self {
        self.page_fetch = page_fetch;
        self
    }

    pub fn tab_id(&self) -> Option<TabId> {
        self.tab_id
    }

    pub fn selection(&mut self) -> &mut SelectionController {
        &mut self.selection
    }

    pub fn overlay(&self) -> Option<&FrameController> {
        self.overlay.as_ref()
    }

    pub fn overlay_mut(&mut self) -> Option<&mut FrameController> {
        self.overlay.as_mut()
    }

    pub fn switch_mode(&mut self, mode: CaptureMode) {
        self.selection.switch_mode(mode);
    }

    /// Click delivered while `Element` mode is active: consume the selection
    /// and rasterize it.
    pub async fn on_click(&mut self, x: f64, y: f64) -> Result<()> {
        if let Some(element) = self.selection.on_click(x, y) {
            self.capture_element(element).await?;
        }
        Ok(())
    }

    /// Rasterize one selected element, proxying any external image
    /// references, and present the result.
    pub async fn capture_element(&mut self, element: ElementHandle) -> Result<()> {
        let fetcher = ImageProxyFetcher::new(
            self.sender.clone(),
            self.page_fetch.clone(),
            self.surface.clone(),
            self.config.fetch_timeout,
        );
        let options = RenderOptions {
            background_color: effective_background(self.dom.as_ref(), element),
            scale: self.config.render_scale,
            on_clone_node: Some(zero_collapsing_margins()),
        };
        let raster = self.renderer.render(element, &options, &fetcher).await?;
        self.present(raster).await;
        Ok(())
    }

    /// Capture the full scrollable page and present the stitched result.
    pub async fn capture_page(&mut self) -> Result<RgbaImage> {
        let session = CaptureSession::new(
            self.dom.clone(),
            self.surface.clone(),
            self.sender.clone(),
            self.config.clone(),
        );
        let stitched = session.capture_full_page().await?;
        self.selection.clear_mode();
        self.present(stitched.clone()).await;
        Ok(stitched)
    }

    /// Hand a finished bitmap to the overlay, honoring the auto-download
    /// preference.
    async fn present(&mut self, raster: RgbaImage) {
        let controller = FrameController::new(
            raster,
            &self.frame_storage,
            self.clipboard.clone(),
            self.host.clone(),
        );
        if self.auto_download.get() {
            if let Err(err) = controller.download().await {
                warn!("auto-download failed: {}", err);
            }
        }
        self.overlay = Some(controller);
    }

    /// Terminal action (Escape key, Cancel button, click outside the
    /// overlay): detach all listeners, discard any outstanding selection,
    /// remove the presentation surface, and tell the privileged side the
    /// script finished so it can release the per-tab running guard.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.selection.clear_selection();
        self.selection.clear_mode();
        self.overlay = None;
        self.surface.remove();
        if let Some(tab_id) = self.tab_id {
            if let Err(err) = self.sender.script_finished(tab_id).await {
                warn!("could not deliver script-finished for tab {}: {}", tab_id, err);
            }
        }
    }
}
