//! Region selection state machine.
//!
//! Exactly one capture mode is active at a time. Switching modes atomically
//! detaches the previous mode's input listeners before attaching the new
//! mode's, so no tick ever sees two modes' listeners registered at once.
//! `Page` and `Area` register inert listener pairs: `Page` capture is driven
//! directly (no pointer interaction), and `Area` is a selectable but
//! unimplemented variant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::page::dom::{Dom, ElementHandle, Surface};

/// Pointer-move events are debounced to roughly this interval.
const HOVER_DEBOUNCE: Duration = Duration::from_millis(10);

/// Which region of the page gets captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// One hovered/selected DOM element
    Element,
    /// The full scrollable page
    Page,
    /// A drawn rectangle; selectable but inert
    Area,
}

/// Input listener slots a mode occupies while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageEvent {
    PointerMove,
    Click,
}

/// Explicit record of which mode's listeners are attached. Kept observable
/// so the no-overlap property is checkable from tests.
#[derive(Debug, Default)]
struct ListenerRegistry {
    attached: Vec<(CaptureMode, PageEvent)>,
}

impl ListenerRegistry {
    fn attach(&mut self, mode: CaptureMode) {
        self.attached.push((mode, PageEvent::PointerMove));
        self.attached.push((mode, PageEvent::Click));
    }

    fn detach(&mut self, mode: CaptureMode) {
        self.attached.retain(|(m, _)| *m != mode);
    }

    fn is_attached(&self, mode: CaptureMode, event: PageEvent) -> bool {
        self.attached.contains(&(mode, event))
    }
}

/// Tracks the active capture mode and the hovered/selected element.
pub struct SelectionController {
    dom: Arc<dyn Dom>,
    surface: Arc<dyn Surface>,
    registry: ListenerRegistry,
    active: Option<CaptureMode>,
    hover: Option<ElementHandle>,
    last_pointer_move: Option<Instant>,
}

impl SelectionController {
    pub fn new(dom: Arc<dyn Dom>, surface: Arc<dyn Surface>) -> Self {
        SelectionController {
            dom,
            surface,
            registry: ListenerRegistry::default(),
            active: None,
            hover: None,
            last_pointer_move: None,
        }
    }

    pub fn active_mode(&self) -> Option<CaptureMode> {
        self.active
    }

    pub fn hover(&self) -> Option<ElementHandle> {
        self.hover
    }

    /// Modes that currently hold registered listeners. At most one at any
    /// instant.
    pub fn registered_modes(&self) -> Vec<CaptureMode> {
        let mut modes: Vec<CaptureMode> = self.registry.attached.iter().map(|(m, _)| *m).collect();
        modes.dedup();
        modes
    }

    /// Activate `mode`, detaching the previous mode's listeners first.
    pub fn switch_mode(&mut self, mode: CaptureMode) {
        if let Some(previous) = self.active {
            self.registry.detach(previous);
        }
        self.registry.attach(mode);
        self.active = Some(mode);
        debug!("capture mode switched to {:?}", mode);
    }

    /// Detach the active mode's listeners without activating another.
    pub fn clear_mode(&mut self) {
        if let Some(mode) = self.active.take() {
            self.registry.detach(mode);
        }
    }

    /// Discard any outstanding hover selection and its outline.
    pub fn clear_selection(&mut self) {
        if self.hover.take().is_some() {
            self.surface.set_hover_outline(None);
        }
    }

    /// Pointer moved over the page (debounced). In `Element` mode, resolves
    /// the topmost element under the cursor and redraws the hover outline.
    /// Events over the tool's own surface are ignored so the tool cannot
    /// select itself.
    pub fn on_pointer_move(&mut self, x: f64, y: f64) {
        if !self.element_listeners_attached(PageEvent::PointerMove) {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_pointer_move {
            if now.duration_since(last) < HOVER_DEBOUNCE {
                return;
            }
        }
        self.last_pointer_move = Some(now);

        let element = match self.dom.element_at(x, y) {
            Some(el) => el,
            None => return,
        };
        if self.surface.contains(element) {
            return;
        }
        self.hover = Some(element);
        self.redraw_outline();
    }

    /// Bounding rectangles are viewport-relative, so the outline must be
    /// repositioned whenever the document scrolls.
    pub fn on_scroll(&mut self) {
        self.redraw_outline();
    }

    /// Click in `Element` mode: the current hover target becomes the capture
    /// target and the mode's listeners detach, so a selection is consumed
    /// exactly once. Clicks on the tool's own surface are ignored.
    pub fn on_click(&mut self, x: f64, y: f64) -> Option<ElementHandle> {
        if !self.element_listeners_attached(PageEvent::Click) {
            return None;
        }
        if let Some(target) = self.dom.element_at(x, y) {
            if self.surface.contains(target) {
                return None;
            }
        }
        let selected = self.hover.take()?;
        self.surface.set_hover_outline(None);
        self.clear_mode();
        Some(selected)
    }

    fn element_listeners_attached(&self, event: PageEvent) -> bool {
        self.active == Some(CaptureMode::Element)
            && self.registry.is_attached(CaptureMode::Element, event)
    }

    fn redraw_outline(&self) {
        match self.hover {
            Some(el) => {
                let rect = self.dom.bounding_rect(el);
                self.surface.set_hover_outline(Some(rect));
            }
            None => self.surface.set_hover_outline(None),
        }
    }
}
