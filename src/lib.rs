//! snapstitch
//!
//! Select a page region (a single element, the visible viewport, or the full
//! scrollable page) inside a browser tab and produce one stitched raster
//! image of it, including cross-origin images the page itself could not
//! fetch.
//!
//! Two isolated contexts cooperate: the restricted page side (DOM access, no
//! capture privilege) drives selection and stitching, and the privileged side
//! (capture and unrestricted fetch, no DOM access) answers typed requests
//! over the [`protocol`] message channel. Full-page capture scrolls the
//! viewport tile by tile, requests one raster per tile from the privileged
//! side, and composites the tiles into a single canvas.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snapstitch::platform::{MemoryStore, NoopCapture, NoopClipboard, NoopHost, StaticPermissions};
//! use snapstitch::privileged::{Backends, Background};
//! use snapstitch::test_utils::{FakeDom, FakeRenderer, FakeSurface};
//! use snapstitch::{page::PageSession, ToolConfig};
//!
//! # async fn run() -> snapstitch::Result<()> {
//! let background = Background::new(Backends {
//!     capture: Arc::new(NoopCapture),
//!     permissions: Arc::new(StaticPermissions::denying()),
//!     host: Arc::new(NoopHost::new()),
//! })?
//! .spawn();
//!
//! let tab = 1;
//! assert!(background.activate(tab));
//! let sender = background.connect(tab);
//!
//! let dom = Arc::new(FakeDom::new(1280, 720, 1280, 3000));
//! let surface = Arc::new(FakeSurface::new());
//! let mut session = PageSession::init(
//!     sender,
//!     dom,
//!     surface,
//!     Arc::new(FakeRenderer::new()),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoopClipboard::new()),
//!     Arc::new(NoopHost::new()),
//!     ToolConfig::default(),
//! )
//! .await;
//!
//! let stitched = session.capture_page().await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod inline;
pub mod protocol;

pub mod capture;
pub mod frame;
pub mod page;
pub mod platform;
pub mod privileged;

pub mod test_utils;

pub use capture::tiler::{Tile, TilePlan};
pub use frame::FrameOptions;
pub use page::selection::CaptureMode;
pub use protocol::{Message, MessageKind, MessageSender, PermissionSet, Response, ResponseData};

use std::time::Duration;

/// Identifier of a browser tab, assigned by the host.
pub type TabId = u32;

/// CSS viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Configuration for a capture session
///
/// The defaults match the behavior of the hosted tool: a 200px top reserve
/// against browser-chrome artifacts at tile seams, a 500ms settle delay after
/// each scroll (lazy-loaded content has no reliable completion event), and a
/// 2x rasterization scale for element captures.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Vertical padding reserved at the top of each tile row
    pub top_padding: i64,
    /// Delay between scrolling to a tile and requesting its capture
    pub settle_delay: Duration,
    /// Rasterization scale passed to the DOM renderer for element captures
    pub render_scale: f64,
    /// Timeout for direct image fetches from the restricted context
    pub fetch_timeout: Option<Duration>,
    /// Whether a failed tile capture is retried once before aborting
    pub retry_failed_tile: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            top_padding: 200,
            settle_delay: Duration::from_millis(500),
            render_scale: 2.0,
            fetch_timeout: Some(Duration::from_secs(15)),
            retry_failed_tile: true,
        }
    }
}
