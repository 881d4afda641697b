//! Deterministic fakes for the browser-supplied surfaces.
//!
//! Public so integration tests, doctests and downstream embeddings can drive
//! a complete capture session without a browser: a clamping scrollable page
//! model, a presentation surface that records what happened to it, a capture
//! backend whose rasters encode the page coordinate they were taken from,
//! and a renderer that exercises the image proxy fetcher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use crate::error::{Error, Result};
use crate::inline;
use crate::page::dom::{
    Dom, DomRenderer, ElementHandle, NodeStyle, PageMetrics, Rect, RenderOptions, Surface,
};
use crate::page::fetch::{ImageProxyFetcher, PageFetch};
use crate::platform::CaptureBackend;
use crate::protocol::HandlerError;
use crate::Viewport;

struct FakeElement {
    rect: Rect,
    background: Option<String>,
    parent: Option<ElementHandle>,
}

struct FakeDomState {
    viewport: Viewport,
    full_width: i64,
    full_height: i64,
    scroll: (i64, i64),
    document_overflow: String,
    body_overflow_y: String,
    elements: Vec<FakeElement>,
    scroll_history: Vec<(i64, i64)>,
}

/// Scrollable page model with browser-like scroll clamping.
pub struct FakeDom {
    state: Mutex<FakeDomState>,
}

impl FakeDom {
    pub fn new(viewport_width: u32, viewport_height: u32, full_width: i64, full_height: i64) -> Self {
        FakeDom {
            state: Mutex::new(FakeDomState {
                viewport: Viewport {
                    width: viewport_width,
                    height: viewport_height,
                },
                full_width,
                full_height,
                scroll: (0, 0),
                document_overflow: "visible".to_string(),
                body_overflow_y: String::new(),
                elements: Vec::new(),
                scroll_history: Vec::new(),
            }),
        }
    }

    /// Add an element; the last added element wins hit testing, like the
    /// topmost element at a point.
    pub fn add_element(
        &self,
        rect: Rect,
        background: Option<&str>,
        parent: Option<ElementHandle>,
    ) -> ElementHandle {
        let mut state = self.state.lock().unwrap();
        state.elements.push(FakeElement {
            rect,
            background: background.map(|s| s.to_string()),
            parent,
        });
        ElementHandle(state.elements.len() as u64 - 1)
    }

    pub fn move_element(&self, element: ElementHandle, x: f64, y: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(el) = state.elements.get_mut(element.0 as usize) {
            el.rect.x = x;
            el.rect.y = y;
        }
    }

    /// Change the viewport mid-flight, as a window resize would.
    pub fn set_viewport(&self, width: u32, height: u32) {
        self.state.lock().unwrap().viewport = Viewport { width, height };
    }

    /// Every scroll target that was requested, pre-clamp.
    pub fn scroll_history(&self) -> Vec<(i64, i64)> {
        self.state.lock().unwrap().scroll_history.clone()
    }

    pub fn set_scroll(&self, x: i64, y: i64) {
        self.state.lock().unwrap().scroll = (x, y);
    }
}

impl Dom for FakeDom {
    fn metrics(&self) -> PageMetrics {
        let state = self.state.lock().unwrap();
        PageMetrics {
            root_client_width: state.viewport.width as i64,
            body_scroll_width: state.full_width,
            root_scroll_width: state.full_width,
            body_offset_width: 0,
            root_offset_width: state.full_width - 1,
            root_client_height: state.viewport.height as i64,
            body_scroll_height: state.full_height,
            root_scroll_height: state.full_height - 1,
            body_offset_height: 0,
            root_offset_height: state.full_height,
        }
    }

    fn viewport(&self) -> Viewport {
        self.state.lock().unwrap().viewport
    }

    fn scroll_to(&self, x: i64, y: i64) {
        let mut state = self.state.lock().unwrap();
        state.scroll_history.push((x, y));
        let max_x = (state.full_width - state.viewport.width as i64).max(0);
        let max_y = (state.full_height - state.viewport.height as i64).max(0);
        state.scroll = (x.clamp(0, max_x), y.clamp(0, max_y));
    }

    fn scroll_position(&self) -> (i64, i64) {
        self.state.lock().unwrap().scroll
    }

    fn document_overflow(&self) -> String {
        self.state.lock().unwrap().document_overflow.clone()
    }

    fn set_document_overflow(&self, value: &str) {
        self.state.lock().unwrap().document_overflow = value.to_string();
    }

    fn body_overflow_y(&self) -> String {
        self.state.lock().unwrap().body_overflow_y.clone()
    }

    fn set_body_overflow_y(&self, value: &str) {
        self.state.lock().unwrap().body_overflow_y = value.to_string();
    }

    fn element_at(&self, x: f64, y: f64) -> Option<ElementHandle> {
        let state = self.state.lock().unwrap();
        state
            .elements
            .iter()
            .enumerate()
            .rev()
            .find(|(_, el)| {
                x >= el.rect.x
                    && x < el.rect.x + el.rect.width
                    && y >= el.rect.y
                    && y < el.rect.y + el.rect.height
            })
            .map(|(i, _)| ElementHandle(i as u64))
    }

    fn bounding_rect(&self, element: ElementHandle) -> Rect {
        let state = self.state.lock().unwrap();
        state
            .elements
            .get(element.0 as usize)
            .map(|el| el.rect)
            .unwrap_or_default()
    }

    fn computed_background(&self, element: ElementHandle) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .elements
            .get(element.0 as usize)
            .and_then(|el| el.background.clone())
    }

    fn parent(&self, element: ElementHandle) -> Option<ElementHandle> {
        let state = self.state.lock().unwrap();
        state
            .elements
            .get(element.0 as usize)
            .and_then(|el| el.parent)
    }
}

/// Presentation surface that records everything done to it.
#[derive(Default)]
pub struct FakeSurface {
    hidden: Mutex<bool>,
    removed: Mutex<bool>,
    hide_count: AtomicUsize,
    show_count: AtomicUsize,
    warnings: AtomicUsize,
    outline: Mutex<Option<Rect>>,
    owned: Mutex<HashSet<ElementHandle>>,
}

impl FakeSurface {
    pub fn new() -> Self {
        FakeSurface::default()
    }

    /// Mark an element as part of the tool's own surface.
    pub fn adopt(&self, element: ElementHandle) {
        self.owned.lock().unwrap().insert(element);
    }

    pub fn is_hidden(&self) -> bool {
        *self.hidden.lock().unwrap()
    }

    pub fn removed(&self) -> bool {
        *self.removed.lock().unwrap()
    }

    pub fn hide_count(&self) -> usize {
        self.hide_count.load(Ordering::SeqCst)
    }

    pub fn show_count(&self) -> usize {
        self.show_count.load(Ordering::SeqCst)
    }

    pub fn permission_warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn hover_outline(&self) -> Option<Rect> {
        *self.outline.lock().unwrap()
    }
}

impl Surface for FakeSurface {
    fn hide(&self) {
        *self.hidden.lock().unwrap() = true;
        self.hide_count.fetch_add(1, Ordering::SeqCst);
    }

    fn show(&self) {
        *self.hidden.lock().unwrap() = false;
        self.show_count.fetch_add(1, Ordering::SeqCst);
    }

    fn contains(&self, element: ElementHandle) -> bool {
        self.owned.lock().unwrap().contains(&element)
    }

    fn set_hover_outline(&self, rect: Option<Rect>) {
        *self.outline.lock().unwrap() = rect;
    }

    fn show_permission_warning(&self) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&self) {
        *self.removed.lock().unwrap() = true;
    }
}

/// Color a capture raster carries at absolute page coordinate `(x, y)`.
/// Stitching tests compare composited pixels against this.
pub fn page_color(x: i64, y: i64) -> Rgba<u8> {
    Rgba([
        (x % 256) as u8,
        (y % 256) as u8,
        ((x / 256 + y / 256) % 256) as u8,
        255,
    ])
}

/// Capture backend that renders the fake page: each raster pixel encodes the
/// absolute page coordinate it shows, scaled by a configurable device pixel
/// ratio.
pub struct FakeCaptureBackend {
    dom: Arc<FakeDom>,
    dpr: u32,
    captures: AtomicUsize,
    fail_remaining: AtomicUsize,
    surface: Option<Arc<FakeSurface>>,
    hidden_at_capture: Mutex<Vec<bool>>,
}

impl FakeCaptureBackend {
    pub fn new(dom: Arc<FakeDom>) -> Self {
        FakeCaptureBackend {
            dom,
            dpr: 1,
            captures: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            surface: None,
            hidden_at_capture: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dpr(mut self, dpr: u32) -> Self {
        self.dpr = dpr.max(1);
        self
    }

    /// Fail the next `n` capture requests before succeeding again.
    pub fn failing_next(self, n: usize) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Record whether this surface was hidden at each capture.
    pub fn observing_surface(mut self, surface: Arc<FakeSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn surface_hidden_at_captures(&self) -> Vec<bool> {
        self.hidden_at_capture.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeCaptureBackend {
    async fn capture_visible(&self) -> std::result::Result<String, HandlerError> {
        if let Some(surface) = &self.surface {
            self.hidden_at_capture
                .lock()
                .unwrap()
                .push(surface.is_hidden());
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HandlerError::Failed("capture backend unavailable".into()));
        }

        let viewport = self.dom.viewport();
        let (sx, sy) = self.dom.scroll_position();
        let raster = RgbaImage::from_fn(
            viewport.width * self.dpr,
            viewport.height * self.dpr,
            |i, j| page_color(sx + (i / self.dpr) as i64, sy + (j / self.dpr) as i64),
        );
        inline::encode_png_data_url(&raster).map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

/// What the fake renderer observed during its last render call.
#[derive(Debug, Clone)]
pub struct RecordedRender {
    pub background_color: String,
    pub scale: f64,
    pub margins_zeroed: bool,
    pub fetched: Vec<(String, Option<String>)>,
}

/// DOM-to-raster renderer stand-in: returns a fixed-size solid raster and
/// routes its configured image URLs through the proxy fetcher.
pub struct FakeRenderer {
    size: (u32, u32),
    image_urls: Vec<String>,
    recorded: Mutex<Option<RecordedRender>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        FakeRenderer {
            size: (64, 48),
            image_urls: Vec::new(),
            recorded: Mutex::new(None),
        }
    }

    pub fn with_image_urls(mut self, urls: &[&str]) -> Self {
        self.image_urls = urls.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn recorded(&self) -> Option<RecordedRender> {
        self.recorded.lock().unwrap().clone()
    }
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomRenderer for FakeRenderer {
    async fn render(
        &self,
        _element: ElementHandle,
        options: &RenderOptions,
        fetch: &ImageProxyFetcher,
    ) -> Result<RgbaImage> {
        let mut fetched = Vec::new();
        for url in &self.image_urls {
            fetched.push((url.clone(), fetch.fetch_image(url).await));
        }
        let margins_zeroed = options
            .on_clone_node
            .as_ref()
            .map(|hook| {
                let mut style = NodeStyle {
                    margin_block: "8px".to_string(),
                    ..NodeStyle::default()
                };
                hook(&mut style);
                style.margin_block == "0px"
            })
            .unwrap_or(false);
        *self.recorded.lock().unwrap() = Some(RecordedRender {
            background_color: options.background_color.clone(),
            scale: options.scale,
            margins_zeroed,
            fetched,
        });
        Ok(RgbaImage::from_pixel(
            self.size.0,
            self.size.1,
            Rgba([200, 200, 200, 255]),
        ))
    }
}

/// Page fetch that always returns the same inline data.
pub struct StaticPageFetch {
    data: String,
}

impl StaticPageFetch {
    pub fn new(data: &str) -> Self {
        StaticPageFetch {
            data: data.to_string(),
        }
    }
}

#[async_trait]
impl PageFetch for StaticPageFetch {
    async fn fetch_data_url(&self, _url: &str, _timeout: Option<Duration>) -> Result<String> {
        Ok(self.data.clone())
    }
}

/// Page fetch that always fails, like a CORS-blocked request.
pub struct FailingPageFetch;

#[async_trait]
impl PageFetch for FailingPageFetch {
    async fn fetch_data_url(&self, url: &str, _timeout: Option<Duration>) -> Result<String> {
        Err(Error::Fetch(format!("blocked by origin policy: {}", url)))
    }
}
