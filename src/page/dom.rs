//! DOM access surface for the restricted context.
//!
//! The page side of the tool needs a narrow slice of the document: scroll
//! control, the five inconsistent width/height sources used to infer full
//! page dimensions, hit testing for element selection, and computed
//! background colors. [`Dom`] abstracts that slice; the embedding supplies
//! the real binding and tests use `test_utils::FakeDom`.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;

use crate::error::Result;
use crate::page::fetch::ImageProxyFetcher;
use crate::Viewport;

/// Opaque handle to a live DOM element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Viewport-relative bounding rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The five width and five height sources the browser reports for a page.
///
/// Any single source can under-report (collapsed margins, fixed-position
/// children), so full page dimensions are the maximum of each group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMetrics {
    pub root_client_width: i64,
    pub body_scroll_width: i64,
    pub root_scroll_width: i64,
    pub body_offset_width: i64,
    pub root_offset_width: i64,

    pub root_client_height: i64,
    pub body_scroll_height: i64,
    pub root_scroll_height: i64,
    pub body_offset_height: i64,
    pub root_offset_height: i64,
}

impl PageMetrics {
    /// Authoritative full page width.
    pub fn full_width(&self) -> i64 {
        [
            self.root_client_width,
            self.body_scroll_width,
            self.root_scroll_width,
            self.body_offset_width,
            self.root_offset_width,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Authoritative full page height.
    pub fn full_height(&self) -> i64 {
        [
            self.root_client_height,
            self.body_scroll_height,
            self.root_scroll_height,
            self.body_offset_height,
            self.root_offset_height,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Restricted-context DOM access.
pub trait Dom: Send + Sync {
    fn metrics(&self) -> PageMetrics;

    /// Current visible viewport size.
    fn viewport(&self) -> Viewport;

    /// Scroll to the given document offsets. The environment clamps out-of-
    /// range targets; callers read back [`Dom::scroll_position`] for the
    /// actual result.
    fn scroll_to(&self, x: i64, y: i64);

    fn scroll_position(&self) -> (i64, i64);

    fn document_overflow(&self) -> String;
    fn set_document_overflow(&self, value: &str);

    fn body_overflow_y(&self) -> String;
    fn set_body_overflow_y(&self, value: &str);

    /// Topmost element at the given viewport coordinates.
    fn element_at(&self, x: f64, y: f64) -> Option<ElementHandle>;

    /// Live viewport-relative bounding rectangle of an element.
    fn bounding_rect(&self, element: ElementHandle) -> Rect;

    /// Computed background color of the element itself, if any.
    fn computed_background(&self, element: ElementHandle) -> Option<String>;

    fn parent(&self, element: ElementHandle) -> Option<ElementHandle>;
}

/// The tool's own presentation surface inside the page (shadow host, hover
/// outline, overlay). Must never appear in captures and must never be
/// selectable as a capture target.
pub trait Surface: Send + Sync {
    fn hide(&self);
    fn show(&self);

    /// Whether the element belongs to the tool's own surface.
    fn contains(&self, element: ElementHandle) -> bool;

    /// Draw (or clear, with `None`) the hover bounding-box outline.
    fn set_hover_outline(&self, rect: Option<Rect>);

    /// Show the one-time permission upsell next to the finished canvas.
    fn show_permission_warning(&self);

    /// Tear the surface down entirely.
    fn remove(&self);
}

const MAX_ANCESTOR_DEPTH: usize = 256;

fn is_transparent(color: &str) -> bool {
    matches!(color.trim(), "" | "transparent" | "rgba(0, 0, 0, 0)")
}

/// Resolve the effective background color of an element by walking up the
/// ancestor chain until a non-transparent computed background, defaulting to
/// white. The walk is bounded so a pathological parent chain cannot spin.
pub fn effective_background(dom: &dyn Dom, element: ElementHandle) -> String {
    let mut current = Some(element);
    for _ in 0..MAX_ANCESTOR_DEPTH {
        let el = match current {
            Some(el) => el,
            None => break,
        };
        if let Some(color) = dom.computed_background(el) {
            if !is_transparent(&color) {
                return color;
            }
        }
        current = dom.parent(el);
    }
    "white".to_string()
}

/// Mutable style slice offered to the clone hook before measurement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStyle {
    pub margin_block_start: String,
    pub margin_block_end: String,
    pub margin_block: String,
    pub margin_inline_start: String,
    pub margin_inline_end: String,
}

/// Node-mutation hook applied to each cloned node before measurement.
pub type CloneHook = Arc<dyn Fn(&mut NodeStyle) + Send + Sync>;

/// Hook that zeroes collapsing margins so cloned subtrees measure the same
/// as their in-document originals.
pub fn zero_collapsing_margins() -> CloneHook {
    Arc::new(|style: &mut NodeStyle| {
        style.margin_block_start = "0px".to_string();
        style.margin_block_end = "0px".to_string();
        style.margin_block = "0px".to_string();
        style.margin_inline_start = "0px".to_string();
        style.margin_inline_end = "0px".to_string();
    })
}

/// Options passed to the DOM-to-raster renderer.
#[derive(Clone)]
pub struct RenderOptions {
    pub background_color: String,
    pub scale: f64,
    pub on_clone_node: Option<CloneHook>,
}

/// DOM-to-raster renderer, treated as a black box. The core supplies the
/// image fetch function (proxying cross-origin images) and the clone hook.
#[async_trait]
pub trait DomRenderer: Send + Sync {
    async fn render(
        &self,
        element: ElementHandle,
        options: &RenderOptions,
        fetch: &ImageProxyFetcher,
    ) -> Result<RgbaImage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeDom;

    #[test]
    fn full_dimensions_take_the_maximum_source() {
        let metrics = PageMetrics {
            root_client_width: 1280,
            body_scroll_width: 1900,
            root_scroll_width: 1910,
            body_offset_width: 0,
            root_offset_width: 1800,
            root_client_height: 720,
            body_scroll_height: 4000,
            root_scroll_height: 3990,
            body_offset_height: 3500,
            root_offset_height: 0,
        };
        assert_eq!(metrics.full_width(), 1910);
        assert_eq!(metrics.full_height(), 4000);
    }

    #[test]
    fn background_resolution_walks_ancestors_with_default() {
        let dom = FakeDom::new(1280, 720, 1280, 1440);
        let root = dom.add_element(Rect::default(), Some("rgb(240, 240, 240)"), None);
        let middle = dom.add_element(Rect::default(), Some("transparent"), Some(root));
        let leaf = dom.add_element(Rect::default(), Some("rgba(0, 0, 0, 0)"), Some(middle));

        assert_eq!(effective_background(&dom, leaf), "rgb(240, 240, 240)");

        let orphan = dom.add_element(Rect::default(), Some("transparent"), None);
        assert_eq!(effective_background(&dom, orphan), "white");
    }

    #[test]
    fn margin_hook_zeroes_all_collapsing_margins() {
        let hook = zero_collapsing_margins();
        let mut style = NodeStyle {
            margin_block_start: "16px".into(),
            ..NodeStyle::default()
        };
        hook(&mut style);
        assert_eq!(style.margin_block_start, "0px");
        assert_eq!(style.margin_inline_end, "0px");
    }
}
