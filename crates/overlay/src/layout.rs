//! Page layout collaborator
//!
//! [`PageLayout`] is what the engine asks to find the page under a pointer
//! and where that page sits on screen. [`ContinuousLayout`] is a ready-made
//! implementation: pages stacked vertically with a fixed gap, centered
//! horizontally, zoomed uniformly and scrolled by a vertical offset.
//!
//! Two spaces are used here. Document-view space is the full scrollable
//! column of pages; screen space is the viewport onto it, i.e. document-view
//! space shifted by the scroll offset.

use pdf_engine::{DocumentModel, PdfEngineResult};
use pdf_markup_core::{CoordinateFrame, MarkupError, MarkupResult, PageId, Rect, Rotation, ScreenPoint};
use std::collections::BTreeSet;

/// Gap between pages and around the column, in screen pixels
const PAGE_GAP: f64 = 20.0;

const MIN_ZOOM: f64 = 0.1;
const MAX_ZOOM: f64 = 8.0;

/// A page entering or leaving the active window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityChange {
    Appeared(PageId),
    Disappeared(PageId),
}

/// Page placement queries consumed by the gesture tracker and the engine
pub trait PageLayout {
    /// Page under a screen point, if any
    fn hit_test_page(&self, point: ScreenPoint) -> Option<PageId>;

    /// Where the page is drawn, in screen space
    fn page_screen_rect(&self, page: PageId) -> Option<Rect>;

    fn page_media_box(&self, page: PageId) -> Option<Rect>;

    fn page_rotation(&self, page: PageId) -> Rotation;

    /// Pages that entered or left the active window since the last call
    fn visibility_changes(&mut self) -> Vec<VisibilityChange>;

    /// Screen/page mapping for the page's current placement
    fn coordinate_frame(&self, page: PageId) -> MarkupResult<CoordinateFrame> {
        let screen_rect = self
            .page_screen_rect(page)
            .ok_or_else(|| MarkupError::invalid_state(format!("{page} is not laid out")))?;
        let media_box = self
            .page_media_box(page)
            .ok_or_else(|| MarkupError::invalid_state(format!("{page} has no media box")))?;
        CoordinateFrame::new(screen_rect, media_box, self.page_rotation(page))
    }
}

/// Intrinsic page geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub media_box: Rect,
    pub rotation: Rotation,
}

impl PageGeometry {
    pub fn new(media_box: Rect, rotation: Rotation) -> Self {
        Self { media_box, rotation }
    }

    /// Unzoomed on-screen size after rotation
    fn display_size(&self) -> (f64, f64) {
        if self.rotation.is_quarter_turn() {
            (self.media_box.height, self.media_box.width)
        } else {
            (self.media_box.width, self.media_box.height)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PlacedPage {
    /// Page rect in document-view space
    rect: Rect,
}

/// Continuous vertical scroll layout
#[derive(Debug, Clone)]
pub struct ContinuousLayout {
    pages: Vec<PageGeometry>,
    placed: Vec<PlacedPage>,
    zoom: f64,
    scroll_y: f64,
    viewport_width: f64,
    viewport_height: f64,
    /// Extra distance above and below the viewport that still counts as visible
    buffer: f64,
    total_height: f64,
    reported: BTreeSet<PageId>,
}

impl ContinuousLayout {
    pub fn new(pages: Vec<PageGeometry>, viewport_width: f64, viewport_height: f64) -> Self {
        let mut layout = Self {
            pages,
            placed: Vec::new(),
            zoom: 1.0,
            scroll_y: 0.0,
            viewport_width,
            viewport_height,
            buffer: 0.0,
            total_height: 0.0,
            reported: BTreeSet::new(),
        };
        layout.compute_layout();
        layout
    }

    /// Lay out every page of a document
    pub fn from_document(
        document: &dyn DocumentModel,
        viewport_width: f64,
        viewport_height: f64,
    ) -> PdfEngineResult<Self> {
        let pages = (0..document.page_count())
            .map(|index| {
                let page = PageId(index);
                Ok(PageGeometry::new(document.page_media_box(page)?, document.page_rotation(page)?))
            })
            .collect::<PdfEngineResult<Vec<_>>>()?;
        Ok(Self::new(pages, viewport_width, viewport_height))
    }

    /// Keep pages within `buffer` pixels of the viewport in the active window
    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer.max(0.0);
        self
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        let zoom = if zoom.is_finite() { zoom.clamp(MIN_ZOOM, MAX_ZOOM) } else { 1.0 };
        if zoom != self.zoom {
            self.zoom = zoom;
            self.compute_layout();
            self.clamp_scroll();
        }
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    pub fn set_scroll(&mut self, scroll_y: f64) {
        self.scroll_y = scroll_y;
        self.clamp_scroll();
    }

    pub fn scroll_by(&mut self, delta_y: f64) {
        self.set_scroll(self.scroll_y + delta_y);
    }

    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport_width = width;
        self.viewport_height = height;
        self.compute_layout();
        self.clamp_scroll();
    }

    pub fn set_rotation(&mut self, page: PageId, rotation: Rotation) {
        if let Some(geometry) = self.pages.get_mut(page.index() as usize) {
            geometry.rotation = rotation;
            self.compute_layout();
        }
    }

    /// Height of the whole page column, in screen pixels
    pub fn total_height(&self) -> f64 {
        self.total_height
    }

    /// Pages within the viewport plus buffer, in page order
    pub fn visible_pages(&self) -> Vec<PageId> {
        let start = self.scroll_y - self.buffer;
        let end = self.scroll_y + self.viewport_height + self.buffer;
        self.placed
            .iter()
            .enumerate()
            .filter(|(_, placed)| placed.rect.max_y() >= start && placed.rect.y <= end)
            .map(|(index, _)| PageId(index as u32))
            .collect()
    }

    fn compute_layout(&mut self) {
        self.placed.clear();
        let mut y_offset = PAGE_GAP;

        for geometry in &self.pages {
            let (width, height) = geometry.display_size();
            let (width, height) = (width * self.zoom, height * self.zoom);
            let x = ((self.viewport_width - width) / 2.0).max(PAGE_GAP);

            self.placed.push(PlacedPage { rect: Rect::new(x, y_offset, width, height) });
            y_offset += height + PAGE_GAP;
        }

        self.total_height = y_offset;
    }

    fn clamp_scroll(&mut self) {
        let max_scroll = (self.total_height - self.viewport_height).max(0.0);
        self.scroll_y = if self.scroll_y.is_finite() { self.scroll_y.clamp(0.0, max_scroll) } else { 0.0 };
    }
}

impl PageLayout for ContinuousLayout {
    fn hit_test_page(&self, point: ScreenPoint) -> Option<PageId> {
        let doc_y = point.y + self.scroll_y;
        self.placed
            .iter()
            .position(|placed| placed.rect.contains(point.x, doc_y))
            .map(|index| PageId(index as u32))
    }

    fn page_screen_rect(&self, page: PageId) -> Option<Rect> {
        let placed = self.placed.get(page.index() as usize)?;
        Some(Rect { y: placed.rect.y - self.scroll_y, ..placed.rect })
    }

    fn page_media_box(&self, page: PageId) -> Option<Rect> {
        self.pages.get(page.index() as usize).map(|geometry| geometry.media_box)
    }

    fn page_rotation(&self, page: PageId) -> Rotation {
        self.pages.get(page.index() as usize).map(|geometry| geometry.rotation).unwrap_or_default()
    }

    fn visibility_changes(&mut self) -> Vec<VisibilityChange> {
        let current: BTreeSet<PageId> = self.visible_pages().into_iter().collect();
        let mut changes: Vec<VisibilityChange> =
            self.reported.difference(&current).map(|&page| VisibilityChange::Disappeared(page)).collect();
        changes.extend(current.difference(&self.reported).map(|&page| VisibilityChange::Appeared(page)));
        self.reported = current;
        changes
    }
}
