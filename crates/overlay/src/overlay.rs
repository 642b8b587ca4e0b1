//! Per-page overlay surfaces
//!
//! [`PageOverlayStore`] is the side table keyed by page identity that holds
//! the drawing state of every page in the active window. Overlays are built
//! lazily and thrown away when their page scrolls out; committed strokes are
//! re-derived from the document on the next acquire.
//!
//! Strokes committed but not yet confirmed by the persistence bridge live in
//! an unflushed table that outlives the overlay, so a release before the
//! flush lands (or after it fails) never loses ink.

use image::RgbaImage;
use pdf_markup_core::{
    BoundingBox, MarkupError, MarkupResult, PageId, Rect, Stroke, StrokeId, StrokeSample,
};
use pdf_markup_render::{AnnotationCompositor, LayerCache, SurfaceView};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Diagnostic snapshot of a page's committed ink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationSummary {
    pub stroke_count: usize,
    /// Union of the committed strokes' sample bounds
    pub bounding_box: Option<BoundingBox>,
    pub pending_flushes: usize,
    pub failed_flushes: usize,
}

/// Drawing state for one visible page
#[derive(Debug)]
pub struct PageOverlay {
    page: PageId,
    media_box: Rect,
    committed: Vec<Arc<Stroke>>,
    in_progress: Option<Stroke>,
    layers: LayerCache,
}

impl PageOverlay {
    fn new(page: PageId, media_box: Rect, committed: Vec<Arc<Stroke>>) -> Self {
        Self { page, media_box, committed, in_progress: None, layers: LayerCache::new() }
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn media_box(&self) -> Rect {
        self.media_box
    }

    pub fn committed(&self) -> &[Arc<Stroke>] {
        &self.committed
    }

    pub fn in_progress(&self) -> Option<&Stroke> {
        self.in_progress.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.layers.is_dirty()
    }

    fn contains(&self, id: StrokeId) -> bool {
        self.committed.iter().any(|stroke| stroke.id() == id)
    }
}

/// Registry of active overlays plus the strokes still waiting on persistence
#[derive(Debug, Default)]
pub struct PageOverlayStore {
    overlays: HashMap<PageId, PageOverlay>,
    unflushed: HashMap<PageId, Vec<Arc<Stroke>>>,
}

impl PageOverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the page's overlay, building it on first use.
    ///
    /// `load` is only called when the overlay does not exist yet; its strokes
    /// are merged with any unflushed ones for the page.
    pub fn acquire(
        &mut self,
        page: PageId,
        media_box: Rect,
        load: impl FnOnce() -> Vec<Stroke>,
    ) -> &mut PageOverlay {
        let unflushed = &self.unflushed;
        self.overlays.entry(page).or_insert_with(|| {
            let mut committed: Vec<Arc<Stroke>> = load()
                .into_iter()
                .map(|stroke| Arc::new(stroke.finalized()))
                .collect();
            let mut seen: HashSet<StrokeId> = committed.iter().map(|stroke| stroke.id()).collect();
            for stroke in unflushed.get(&page).into_iter().flatten() {
                if seen.insert(stroke.id()) {
                    committed.push(Arc::clone(stroke));
                }
            }
            log::debug!("{page}: acquired overlay with {} committed strokes", committed.len());
            PageOverlay::new(page, media_box, committed)
        })
    }

    /// Slide strokes read from the document underneath the page's committed
    /// set, skipping any the overlay already holds.
    ///
    /// Returns how many were added; the page's cached rasters are dropped
    /// when that is not zero.
    pub fn merge_persisted(&mut self, page: PageId, strokes: Vec<Stroke>) -> usize {
        let Some(overlay) = self.overlays.get_mut(&page) else {
            return 0;
        };
        let mut seen: HashSet<StrokeId> =
            overlay.committed.iter().map(|stroke| stroke.id()).collect();
        let older: Vec<Arc<Stroke>> = strokes
            .into_iter()
            .filter(|stroke| seen.insert(stroke.id()))
            .map(|stroke| Arc::new(stroke.finalized()))
            .collect();

        let added = older.len();
        if added > 0 {
            overlay.committed.splice(0..0, older);
            overlay.layers.clear();
            log::debug!("{page}: merged {added} persisted strokes");
        }
        added
    }

    /// Drop the page's overlay, its open stroke and its cached rasters.
    ///
    /// Returns `false` when the page had no overlay.
    pub fn release(&mut self, page: PageId) -> bool {
        match self.overlays.remove(&page) {
            Some(overlay) => {
                if overlay.in_progress.is_some() {
                    log::debug!("{page}: released overlay discarding an open stroke");
                } else {
                    log::debug!("{page}: released overlay");
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, page: PageId) -> Option<&PageOverlay> {
        self.overlays.get(&page)
    }

    pub fn is_active(&self, page: PageId) -> bool {
        self.overlays.contains_key(&page)
    }

    /// Pages with an overlay, in page order
    pub fn active_pages(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self.overlays.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Move a finalized stroke into the page's committed set.
    ///
    /// Clears the in-progress slot and records the stroke as unflushed until
    /// [`Self::mark_flushed`] is called for it.
    pub fn commit_stroke(&mut self, page: PageId, stroke: Stroke) -> MarkupResult<Arc<Stroke>> {
        if !stroke.is_finalized() {
            return Err(MarkupError::invalid_state(format!(
                "stroke {} must be finalized before commit",
                stroke.id()
            )));
        }
        let overlay = self.overlay_mut(page)?;
        if overlay.contains(stroke.id()) {
            return Err(MarkupError::invalid_state(format!(
                "stroke {} is already committed on {page}",
                stroke.id()
            )));
        }

        let stroke = Arc::new(stroke);
        overlay.committed.push(Arc::clone(&stroke));
        overlay.in_progress = None;
        overlay.layers.mark_dirty();
        self.unflushed.entry(page).or_default().push(Arc::clone(&stroke));

        log::debug!("{page}: committed stroke {} ({} samples)", stroke.id(), stroke.len());
        Ok(stroke)
    }

    /// Replace the page's in-progress stroke
    pub fn update_in_progress(&mut self, page: PageId, stroke: Stroke) -> MarkupResult<()> {
        if stroke.is_finalized() {
            return Err(MarkupError::invalid_state(format!(
                "stroke {} is finalized and cannot be in progress",
                stroke.id()
            )));
        }
        let overlay = self.overlay_mut(page)?;
        overlay.in_progress = Some(stroke);
        overlay.layers.mark_dirty();
        Ok(())
    }

    /// Append one sample to the page's in-progress stroke
    pub fn extend_in_progress(&mut self, page: PageId, sample: StrokeSample) -> MarkupResult<()> {
        let overlay = self.overlay_mut(page)?;
        let stroke = overlay
            .in_progress
            .as_mut()
            .ok_or_else(|| MarkupError::invalid_state(format!("{page} has no stroke in progress")))?;
        stroke.push(sample)?;
        overlay.layers.mark_dirty();
        Ok(())
    }

    /// Discard the page's in-progress stroke, if there is one
    pub fn clear_in_progress(&mut self, page: PageId) {
        if let Some(overlay) = self.overlays.get_mut(&page) {
            if overlay.in_progress.take().is_some() {
                overlay.layers.mark_dirty();
            }
        }
    }

    /// The stroke reached the document; it no longer needs to be held here
    pub fn mark_flushed(&mut self, page: PageId, stroke: StrokeId) {
        if let Some(strokes) = self.unflushed.get_mut(&page) {
            strokes.retain(|held| held.id() != stroke);
            if strokes.is_empty() {
                self.unflushed.remove(&page);
            }
        }
    }

    /// Strokes committed on `page` and not yet confirmed by persistence
    pub fn unflushed(&self, page: PageId) -> &[Arc<Stroke>] {
        self.unflushed.get(&page).map(Vec::as_slice).unwrap_or_default()
    }

    /// Request a recomposite of the page on its next render
    pub fn mark_dirty(&mut self, page: PageId) {
        if let Some(overlay) = self.overlays.get_mut(&page) {
            overlay.layers.mark_dirty();
        }
    }

    /// Drop every page's cached rasters
    pub fn invalidate_all(&mut self) {
        for overlay in self.overlays.values_mut() {
            overlay.layers.clear();
        }
    }

    /// Stroke count and bounds for an active page
    pub fn summary(&self, page: PageId) -> Option<AnnotationSummary> {
        let overlay = self.overlays.get(&page)?;
        let bounding_box = overlay
            .committed
            .iter()
            .map(|stroke| stroke.bounding_box())
            .reduce(|acc, bbox| acc.union(&bbox));
        Some(AnnotationSummary {
            stroke_count: overlay.committed.len(),
            bounding_box,
            pending_flushes: 0,
            failed_flushes: 0,
        })
    }

    /// Composite the page's committed and in-progress strokes
    pub fn render(
        &mut self,
        page: PageId,
        compositor: &mut AnnotationCompositor,
    ) -> MarkupResult<Arc<RgbaImage>> {
        let overlay = self.overlay_mut(page)?;
        compositor.render(SurfaceView {
            page,
            media_box: overlay.media_box,
            committed: &overlay.committed,
            in_progress: overlay.in_progress.as_ref(),
            layers: &mut overlay.layers,
        })
    }

    fn overlay_mut(&mut self, page: PageId) -> MarkupResult<&mut PageOverlay> {
        self.overlays
            .get_mut(&page)
            .ok_or_else(|| MarkupError::invalid_state(format!("{page} has no active overlay")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_markup_core::{InkStyle, PagePoint};
    use pdf_markup_render::CompositorConfig;

    const PAGE: PageId = PageId(0);

    fn media_box() -> Rect {
        Rect::from_size(100.0, 100.0)
    }

    fn sample(x: f64, y: f64) -> StrokeSample {
        StrokeSample::new(PagePoint::new(x, y), 0.0, 0)
    }

    fn open_stroke(x: f64, y: f64) -> Stroke {
        Stroke::begin(InkStyle::default(), sample(x, y))
    }

    fn finished_stroke(points: &[(f64, f64)]) -> Stroke {
        let mut stroke = open_stroke(points[0].0, points[0].1);
        for &(x, y) in &points[1..] {
            stroke.push(sample(x, y)).unwrap();
        }
        stroke.finalized()
    }

    #[test]
    fn acquire_is_idempotent_and_loads_once() {
        let mut store = PageOverlayStore::new();
        let mut loads = 0;
        store.acquire(PAGE, media_box(), || {
            loads += 1;
            vec![finished_stroke(&[(1.0, 1.0), (2.0, 2.0)])]
        });
        store.acquire(PAGE, media_box(), || {
            loads += 1;
            Vec::new()
        });

        assert_eq!(loads, 1);
        assert_eq!(store.summary(PAGE).unwrap().stroke_count, 1);
    }

    #[test]
    fn release_is_idempotent() {
        let mut store = PageOverlayStore::new();
        store.acquire(PAGE, media_box(), Vec::new);
        assert!(store.release(PAGE));
        assert!(!store.release(PAGE));
        assert!(!store.is_active(PAGE));
    }

    #[test]
    fn commit_clears_in_progress_and_marks_dirty() {
        let mut store = PageOverlayStore::new();
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        store.acquire(PAGE, media_box(), Vec::new);
        store.render(PAGE, &mut compositor).unwrap();
        assert!(!store.get(PAGE).unwrap().is_dirty());

        store.update_in_progress(PAGE, open_stroke(10.0, 10.0)).unwrap();
        store.extend_in_progress(PAGE, sample(20.0, 20.0)).unwrap();
        assert_eq!(store.get(PAGE).unwrap().in_progress().unwrap().len(), 2);

        let stroke = finished_stroke(&[(10.0, 10.0), (20.0, 20.0)]);
        store.commit_stroke(PAGE, stroke).unwrap();

        let overlay = store.get(PAGE).unwrap();
        assert!(overlay.in_progress().is_none());
        assert!(overlay.is_dirty());
        assert_eq!(overlay.committed().len(), 1);
        assert_eq!(store.unflushed(PAGE).len(), 1);
    }

    #[test]
    fn commit_requires_finalized_stroke_and_active_overlay() {
        let mut store = PageOverlayStore::new();
        assert!(matches!(
            store.commit_stroke(PAGE, finished_stroke(&[(1.0, 1.0)])),
            Err(MarkupError::InvalidState(_))
        ));

        store.acquire(PAGE, media_box(), Vec::new);
        assert!(matches!(
            store.commit_stroke(PAGE, open_stroke(1.0, 1.0)),
            Err(MarkupError::InvalidState(_))
        ));
        assert_eq!(store.summary(PAGE).unwrap().stroke_count, 0);
        assert!(store.unflushed(PAGE).is_empty());
    }

    #[test]
    fn unflushed_strokes_survive_release() {
        let mut store = PageOverlayStore::new();
        store.acquire(PAGE, media_box(), Vec::new);
        let flushed = store.commit_stroke(PAGE, finished_stroke(&[(1.0, 1.0)])).unwrap();
        store.commit_stroke(PAGE, finished_stroke(&[(5.0, 5.0)])).unwrap();
        store.mark_flushed(PAGE, flushed.id());
        store.release(PAGE);

        // The document only knows the flushed stroke.
        let persisted = Stroke::clone(&flushed);
        store.acquire(PAGE, media_box(), || vec![persisted]);
        assert_eq!(store.summary(PAGE).unwrap().stroke_count, 2);
    }

    #[test]
    fn reload_deduplicates_strokes_already_in_document() {
        let mut store = PageOverlayStore::new();
        store.acquire(PAGE, media_box(), Vec::new);
        let stroke = store.commit_stroke(PAGE, finished_stroke(&[(1.0, 1.0)])).unwrap();
        store.release(PAGE);

        // Flush landed but its completion was not observed yet.
        let persisted = Stroke::clone(&stroke);
        store.acquire(PAGE, media_box(), || vec![persisted]);
        assert_eq!(store.summary(PAGE).unwrap().stroke_count, 1);
    }

    #[test]
    fn merge_persisted_goes_underneath_and_skips_known_strokes() {
        let mut store = PageOverlayStore::new();
        store.acquire(PAGE, media_box(), Vec::new);
        let fresh = store.commit_stroke(PAGE, finished_stroke(&[(5.0, 5.0)])).unwrap();
        let older = finished_stroke(&[(1.0, 1.0), (2.0, 2.0)]);
        let older_id = older.id();

        let merged = store.merge_persisted(PAGE, vec![older, Stroke::clone(&fresh)]);
        assert_eq!(merged, 1);
        let order: Vec<StrokeId> =
            store.get(PAGE).unwrap().committed().iter().map(|s| s.id()).collect();
        assert_eq!(order, vec![older_id, fresh.id()]);
        assert!(store.get(PAGE).unwrap().is_dirty());

        assert_eq!(store.merge_persisted(PAGE, Vec::new()), 0);
        assert_eq!(store.merge_persisted(PageId(7), vec![finished_stroke(&[(1.0, 1.0)])]), 0);
    }

    #[test]
    fn release_discards_open_stroke() {
        let mut store = PageOverlayStore::new();
        store.acquire(PAGE, media_box(), Vec::new);
        store.update_in_progress(PAGE, open_stroke(1.0, 1.0)).unwrap();
        store.release(PAGE);

        store.acquire(PAGE, media_box(), Vec::new);
        assert!(store.get(PAGE).unwrap().in_progress().is_none());
        assert!(store.extend_in_progress(PAGE, sample(2.0, 2.0)).is_err());
    }

    #[test]
    fn summary_unions_sample_bounds() {
        let mut store = PageOverlayStore::new();
        store.acquire(PAGE, media_box(), Vec::new);
        assert_eq!(store.summary(PAGE).unwrap().bounding_box, None);

        store.commit_stroke(PAGE, finished_stroke(&[(10.0, 10.0), (20.0, 30.0)])).unwrap();
        store.commit_stroke(PAGE, finished_stroke(&[(40.0, 5.0), (50.0, 15.0)])).unwrap();

        let bbox = store.summary(PAGE).unwrap().bounding_box.unwrap();
        assert_eq!((bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y), (10.0, 5.0, 50.0, 30.0));
        assert!(store.summary(PageId(3)).is_none());
    }
}
