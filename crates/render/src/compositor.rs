//! Layered annotation compositor
//!
//! A page's frame is built from two layers:
//! 1. the committed layer, a cached raster of every committed stroke
//! 2. the in-progress stroke, drawn fresh on top of a copy of that layer
//!
//! Committed strokes only ever get appended to a page's set, so the committed
//! layer is extended incrementally instead of being redrawn from scratch. In
//! background mode the extension runs on a worker; the finished layer is
//! swapped in on the owner thread, and only while no stroke is in progress on
//! that page.

use crate::raster::{blank_raster, draw_stroke};
use image::RgbaImage;
use pdf_markup_core::{MarkupError, MarkupResult, PageId, RasterFrame, Rect, Stroke};
use pdf_markup_scheduler::{
    CancellationToken, Completion, SupersedeRegistry, TaskHandle, TaskOutcome, WorkerPool,
    WorkerPoolConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Where committed-layer rasterization runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMode {
    /// On the calling thread, during `render`
    #[default]
    Inline,
    /// On a worker thread; results are picked up by `poll`
    Background,
}

/// Compositor settings
#[derive(Debug, Clone, PartialEq)]
pub struct CompositorConfig {
    /// Pixels per page point
    pub scale: f64,
    pub mode: CompositeMode,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self { scale: 1.0, mode: CompositeMode::Inline }
    }
}

#[derive(Debug, Clone)]
struct CommittedLayer {
    image: Arc<RgbaImage>,
    /// Number of leading committed strokes baked into `image`
    covered: usize,
    scale: f64,
}

/// Per-page raster cache, owned by the page's overlay
#[derive(Debug)]
pub struct LayerCache {
    committed: Option<CommittedLayer>,
    frame: Option<Arc<RgbaImage>>,
    dirty: bool,
}

impl LayerCache {
    pub fn new() -> Self {
        Self { committed: None, frame: None, dirty: true }
    }

    /// Request a recomposite on the next render
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drop both layers
    pub fn clear(&mut self) {
        self.committed = None;
        self.frame = None;
        self.dirty = true;
    }

    /// Committed strokes already baked into the cached layer
    pub fn covered(&self) -> usize {
        self.committed.as_ref().map_or(0, |layer| layer.covered)
    }

    /// Last composited frame, if any
    pub fn frame(&self) -> Option<&Arc<RgbaImage>> {
        self.frame.as_ref()
    }
}

impl Default for LayerCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the compositor needs to draw one page
pub struct SurfaceView<'a> {
    pub page: PageId,
    pub media_box: Rect,
    pub committed: &'a [Arc<Stroke>],
    pub in_progress: Option<&'a Stroke>,
    pub layers: &'a mut LayerCache,
}

/// Output of a background layer rebuild
#[derive(Debug)]
pub struct LayerJob {
    page: PageId,
    covered: usize,
    scale: f64,
    image: RgbaImage,
}

/// Converts a page's stroke collection into a drawable raster
pub struct AnnotationCompositor {
    config: CompositorConfig,
    pool: Option<WorkerPool<LayerJob>>,
    tokens: SupersedeRegistry<PageId>,
    pending: HashMap<PageId, TaskHandle>,
    ready: HashMap<PageId, CommittedLayer>,
}

impl AnnotationCompositor {
    pub fn new(config: CompositorConfig) -> MarkupResult<Self> {
        if !(config.scale.is_finite() && config.scale > 0.0) {
            return Err(MarkupError::degenerate(format!(
                "raster scale {} must be positive",
                config.scale
            )));
        }

        let pool = match config.mode {
            CompositeMode::Inline => None,
            CompositeMode::Background => {
                let pool_config = WorkerPoolConfig::new(1).with_thread_name("pdf-markup-composite");
                Some(WorkerPool::new(pool_config).map_err(|e| {
                    MarkupError::invalid_state(format!("failed to start composite worker: {e}"))
                })?)
            }
        };

        Ok(Self {
            config,
            pool,
            tokens: SupersedeRegistry::new(),
            pending: HashMap::new(),
            ready: HashMap::new(),
        })
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn scale(&self) -> f64 {
        self.config.scale
    }

    /// Change the raster scale; every cached layer is rebuilt on its next render
    pub fn set_scale(&mut self, scale: f64) -> MarkupResult<()> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(MarkupError::degenerate(format!("raster scale {scale} must be positive")));
        }
        if scale != self.config.scale {
            self.config.scale = scale;
            self.tokens.cancel_all();
            self.pending.clear();
            self.ready.clear();
        }
        Ok(())
    }

    /// Composite a page, reusing the cached frame when nothing changed
    pub fn render(&mut self, view: SurfaceView<'_>) -> MarkupResult<Arc<RgbaImage>> {
        let SurfaceView { page, media_box, committed, in_progress, layers } = view;
        let scale = self.config.scale;
        let frame = RasterFrame::new(media_box, scale)?;

        if in_progress.is_none() {
            self.swap_ready_layer(page, committed.len(), layers);
        }

        if layers.committed.as_ref().is_some_and(|layer| {
            layer.scale != scale
                || layer.covered > committed.len()
                || layer.image.dimensions() != (frame.width_px(), frame.height_px())
        }) {
            log::debug!("{page}: committed layer no longer matches, rebuilding");
            layers.committed = None;
            layers.dirty = true;
        }

        if !layers.dirty {
            if let Some(cached) = &layers.frame {
                return Ok(Arc::clone(cached));
            }
        }

        let layer = layers.committed.get_or_insert_with(|| CommittedLayer {
            image: Arc::new(blank_raster(&frame)),
            covered: 0,
            scale,
        });

        if layer.covered < committed.len() {
            match self.config.mode {
                CompositeMode::Inline => {
                    let image = Arc::make_mut(&mut layer.image);
                    for stroke in &committed[layer.covered..] {
                        draw_stroke(image, &frame, stroke);
                    }
                    layer.covered = committed.len();
                }
                CompositeMode::Background => {
                    if !self.pending.contains_key(&page) && !self.ready.contains_key(&page) {
                        self.submit_rebuild(page, frame, layer, committed);
                    }
                }
            }
        }

        let uncovered = &committed[layer.covered..];
        let composed = if uncovered.is_empty() && in_progress.is_none() {
            Arc::clone(&layer.image)
        } else {
            let mut image = RgbaImage::clone(&layer.image);
            for stroke in uncovered {
                draw_stroke(&mut image, &frame, stroke);
            }
            if let Some(stroke) = in_progress {
                draw_stroke(&mut image, &frame, stroke);
            }
            Arc::new(image)
        };

        layers.frame = Some(Arc::clone(&composed));
        layers.dirty = false;
        log::trace!("{page}: composited {} committed strokes", committed.len());
        Ok(composed)
    }

    /// Collect finished background layers without blocking.
    ///
    /// Returns the pages that have a new layer waiting and should be redrawn.
    pub fn poll(&mut self) -> Vec<PageId> {
        let completions = match self.pool.as_mut() {
            Some(pool) => pool.try_completions(),
            None => return Vec::new(),
        };
        self.accept(completions)
    }

    /// Like [`Self::poll`], but blocks up to `timeout` for the first completion
    pub fn wait(&mut self, timeout: Duration) -> Vec<PageId> {
        let completions = match self.pool.as_mut() {
            Some(pool) => {
                let mut done: Vec<_> = pool.wait_completion(timeout).into_iter().collect();
                done.extend(pool.try_completions());
                done
            }
            None => return Vec::new(),
        };
        self.accept(completions)
    }

    /// Whether a background rebuild is queued or running for `page`
    pub fn is_pending(&self, page: PageId) -> bool {
        self.pending.contains_key(&page)
    }

    /// Drop everything held for a page that left the visible window
    pub fn forget(&mut self, page: PageId) {
        self.tokens.cancel(page);
        self.pending.remove(&page);
        self.ready.remove(&page);
    }

    /// Cancel every background rebuild
    pub fn cancel_all(&mut self) {
        let cancelled = self.tokens.cancel_all();
        if cancelled > 0 {
            log::debug!("cancelled {cancelled} composite jobs");
        }
        self.pending.clear();
        self.ready.clear();
    }

    fn swap_ready_layer(&mut self, page: PageId, committed_len: usize, layers: &mut LayerCache) {
        let Some(ready) = self.ready.remove(&page) else {
            return;
        };
        let usable = ready.scale == self.config.scale
            && ready.covered <= committed_len
            && ready.covered > layers.covered();
        if usable {
            log::trace!("{page}: swapped in layer covering {} strokes", ready.covered);
            layers.committed = Some(ready);
            layers.dirty = true;
        }
    }

    fn submit_rebuild(
        &mut self,
        page: PageId,
        frame: RasterFrame,
        layer: &CommittedLayer,
        committed: &[Arc<Stroke>],
    ) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };

        let base = Arc::clone(&layer.image);
        let strokes: Vec<Arc<Stroke>> = committed[layer.covered..].to_vec();
        let covered = committed.len();
        let scale = layer.scale;

        let token = self.tokens.issue(page);
        let handle = pool.submit_with_token(
            Box::new(move |token: &CancellationToken| {
                let mut image = RgbaImage::clone(&base);
                for stroke in &strokes {
                    if token.is_cancelled() {
                        break;
                    }
                    draw_stroke(&mut image, &frame, stroke);
                }
                LayerJob { page, covered, scale, image }
            }),
            token,
        );
        log::trace!("{page}: submitted layer rebuild {}", handle.id);
        self.pending.insert(page, handle);
    }

    fn accept(&mut self, completions: Vec<Completion<LayerJob>>) -> Vec<PageId> {
        let mut updated = Vec::new();
        for Completion { id, outcome } in completions {
            let page = match self.pending.iter().find(|(_, handle)| handle.id == id) {
                Some((&page, _)) => page,
                // Superseded or forgotten
                None => continue,
            };
            let Some(handle) = self.pending.remove(&page) else {
                continue;
            };
            self.tokens.retire(page, &handle.token);

            match outcome {
                TaskOutcome::Finished(job) if job.page == page => {
                    self.ready.insert(
                        page,
                        CommittedLayer {
                            image: Arc::new(job.image),
                            covered: job.covered,
                            scale: job.scale,
                        },
                    );
                    updated.push(page);
                }
                TaskOutcome::Finished(_) | TaskOutcome::Cancelled => {}
                TaskOutcome::Panicked => log::error!("{page}: layer rebuild panicked"),
            }
        }
        updated
    }
}

impl Drop for AnnotationCompositor {
    fn drop(&mut self) {
        // Composites can always be rebuilt; skip whatever is still queued.
        if let Some(pool) = self.pool.take() {
            pool.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{coverage_bounds, coverage_bounds_in_page};
    use pdf_markup_core::{Color, InkStyle, StrokeSample};

    const WAIT: Duration = Duration::from_secs(5);

    fn media() -> Rect {
        Rect::from_size(100.0, 100.0)
    }

    fn stroke(points: &[(f64, f64)]) -> Stroke {
        let mut samples = points
            .iter()
            .map(|&(x, y)| StrokeSample { x, y, pressure: 1.0, timestamp: 0 });
        let mut stroke = Stroke::begin(InkStyle::new(Color::BLACK, 1.0), samples.next().unwrap());
        for sample in samples {
            stroke.push(sample).unwrap();
        }
        stroke
    }

    fn committed(points: &[(f64, f64)]) -> Arc<Stroke> {
        Arc::new(stroke(points).finalized())
    }

    fn render(
        compositor: &mut AnnotationCompositor,
        committed: &[Arc<Stroke>],
        in_progress: Option<&Stroke>,
        layers: &mut LayerCache,
    ) -> Arc<RgbaImage> {
        compositor
            .render(SurfaceView { page: PageId(0), media_box: media(), committed, in_progress, layers })
            .unwrap()
    }

    #[test]
    fn committed_stroke_lands_on_native_page_bounds() {
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        let mut layers = LayerCache::new();
        let strokes = vec![committed(&[(10.0, 10.0), (50.0, 50.0)])];

        let image = render(&mut compositor, &strokes, None, &mut layers);
        let bbox = coverage_bounds_in_page(&image, media(), 1.0).unwrap().unwrap();

        assert!((bbox.min_x - 10.0).abs() <= 1.0, "{bbox:?}");
        assert!((bbox.min_y - 10.0).abs() <= 1.0, "{bbox:?}");
        assert!((bbox.max_x - 50.0).abs() <= 1.0, "{bbox:?}");
        assert!((bbox.max_y - 50.0).abs() <= 1.0, "{bbox:?}");
    }

    #[test]
    fn clean_cache_returns_the_same_frame() {
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        let mut layers = LayerCache::new();
        let strokes = vec![committed(&[(10.0, 10.0), (20.0, 20.0)])];

        let first = render(&mut compositor, &strokes, None, &mut layers);
        assert!(!layers.is_dirty());
        let second = render(&mut compositor, &strokes, None, &mut layers);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn in_progress_stroke_does_not_touch_committed_layer() {
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        let mut layers = LayerCache::new();
        let strokes = vec![committed(&[(10.0, 10.0), (20.0, 20.0)])];

        render(&mut compositor, &strokes, None, &mut layers);
        let layer_before = Arc::clone(&layers.committed.as_ref().unwrap().image);

        let open = stroke(&[(60.0, 60.0), (80.0, 80.0)]);
        layers.mark_dirty();
        let with_open = render(&mut compositor, &strokes, Some(&open), &mut layers);

        let layer_after = &layers.committed.as_ref().unwrap().image;
        assert!(Arc::ptr_eq(&layer_before, layer_after));
        assert_ne!(coverage_bounds(&with_open), coverage_bounds(layer_after));
    }

    #[test]
    fn commits_extend_the_layer_incrementally() {
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        let mut layers = LayerCache::new();
        let mut strokes = vec![committed(&[(10.0, 10.0), (20.0, 20.0)])];

        render(&mut compositor, &strokes, None, &mut layers);
        assert_eq!(layers.covered(), 1);

        strokes.push(committed(&[(70.0, 70.0), (90.0, 90.0)]));
        layers.mark_dirty();
        let image = render(&mut compositor, &strokes, None, &mut layers);
        assert_eq!(layers.covered(), 2);

        let (x0, _, x1, _) = coverage_bounds(&image).unwrap();
        assert!(x0 <= 10 && x1 >= 89);
    }

    #[test]
    fn scale_change_rebuilds_layer() {
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        let mut layers = LayerCache::new();
        let strokes = vec![committed(&[(10.0, 10.0), (20.0, 20.0)])];

        render(&mut compositor, &strokes, None, &mut layers);
        compositor.set_scale(2.0).unwrap();
        let image = render(&mut compositor, &strokes, None, &mut layers);

        assert_eq!(image.dimensions(), (200, 200));
        assert!(compositor.set_scale(0.0).is_err());
    }

    #[test]
    fn background_layer_waits_until_no_stroke_is_in_progress() {
        let config = CompositorConfig { scale: 1.0, mode: CompositeMode::Background };
        let mut compositor = AnnotationCompositor::new(config).unwrap();
        let mut layers = LayerCache::new();
        let strokes = vec![committed(&[(10.0, 10.0), (20.0, 20.0)])];
        let open = stroke(&[(60.0, 60.0), (80.0, 80.0)]);

        // Uncovered committed strokes are drawn fresh meanwhile.
        let frame = render(&mut compositor, &strokes, Some(&open), &mut layers);
        assert!(compositor.is_pending(PageId(0)));
        assert_eq!(layers.covered(), 0);
        let (x0, _, x1, _) = coverage_bounds(&frame).unwrap();
        assert!(x0 <= 10 && x1 >= 79);

        assert_eq!(compositor.wait(WAIT), vec![PageId(0)]);

        layers.mark_dirty();
        render(&mut compositor, &strokes, Some(&open), &mut layers);
        assert_eq!(layers.covered(), 0);

        render(&mut compositor, &strokes, None, &mut layers);
        assert_eq!(layers.covered(), 1);
    }

    #[test]
    fn forgotten_page_discards_background_result() {
        let config = CompositorConfig { scale: 1.0, mode: CompositeMode::Background };
        let mut compositor = AnnotationCompositor::new(config).unwrap();
        let mut layers = LayerCache::new();
        let strokes = vec![committed(&[(10.0, 10.0), (20.0, 20.0)])];

        render(&mut compositor, &strokes, None, &mut layers);
        compositor.forget(PageId(0));
        assert!(!compositor.is_pending(PageId(0)));
        assert!(compositor.wait(WAIT).is_empty());

        let mut fresh = LayerCache::new();
        render(&mut compositor, &strokes, None, &mut fresh);
        assert_eq!(fresh.covered(), 0);
    }

    #[test]
    fn inline_mode_has_nothing_to_poll() {
        let mut compositor = AnnotationCompositor::new(CompositorConfig::default()).unwrap();
        assert!(compositor.poll().is_empty());
        assert!(AnnotationCompositor::new(CompositorConfig { scale: -1.0, ..Default::default() })
            .is_err());
    }
}
