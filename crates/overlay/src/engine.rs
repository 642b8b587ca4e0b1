//! The markup engine facade
//!
//! [`MarkupEngine`] is the single owner of gesture, overlay and compositor
//! state. The host shell drives it from one thread:
//!
//! - feed pointer events through [`MarkupEngine::handle_input`]
//! - forward visibility changes (or call [`MarkupEngine::refresh_visibility`])
//! - draw [`MarkupEngine::current_raster`] over each visible page
//! - call [`MarkupEngine::poll`] once per frame to pick up persistence and
//!   background compositing results
//!
//! Persistence failures never come back from `handle_input`; they surface as
//! [`PersistenceEvent`]s from `poll`.
//!
//! In background mode the owner thread never waits on the document. A page
//! acquired while a flush or save holds it starts from its unflushed strokes
//! only, and picks up the persisted ones on a later `poll`.

use crate::config::{InputPolicy, MarkupConfig};
use crate::gesture::{GesturePhase, GestureTracker, StrokeEvent};
use crate::input::{InputEvent, PointId};
use crate::layout::{PageLayout, VisibilityChange};
use crate::overlay::{AnnotationSummary, PageOverlayStore};
use crate::persistence::{PersistenceBridge, PersistenceEvent, PersistenceMode};
use image::RgbaImage;
use pdf_engine::DocumentModel;
use pdf_markup_core::{InkStyle, MarkupError, MarkupResult, PageId, Stroke, StrokeId};
use pdf_markup_render::{AnnotationCompositor, CompositorConfig};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ink annotation engine over a document model and a page layout
pub struct MarkupEngine<D: DocumentModel, L: PageLayout> {
    config: MarkupConfig,
    layout: L,
    tracker: GestureTracker,
    store: PageOverlayStore,
    compositor: AnnotationCompositor,
    bridge: PersistenceBridge<D>,
    /// Strokes were flushed since the last save request
    dirty_since_save: bool,
    /// Active pages still missing their persisted strokes
    deferred_reloads: HashSet<PageId>,
}

impl<D: DocumentModel, L: PageLayout> MarkupEngine<D, L> {
    pub fn new(document: D, layout: L, config: MarkupConfig) -> MarkupResult<Self> {
        config
            .validate()
            .map_err(|e| MarkupError::invalid_state(format!("invalid configuration: {e}")))?;

        let compositor = AnnotationCompositor::new(CompositorConfig {
            scale: config.raster_scale,
            mode: config.composite_mode,
        })?;
        let bridge = PersistenceBridge::new(document, config.persistence_mode, config.stamp_scale)?;
        let tracker = GestureTracker::new(config.input_policy.clone(), config.ink);

        log::debug!(
            "markup engine ready (composite {:?}, persistence {:?})",
            config.composite_mode,
            config.persistence_mode
        );

        Ok(Self {
            config,
            layout,
            tracker,
            store: PageOverlayStore::new(),
            compositor,
            bridge,
            dirty_since_save: false,
            deferred_reloads: HashSet::new(),
        })
    }

    pub fn config(&self) -> &MarkupConfig {
        &self.config
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Mutable access for scrolling and zooming. Follow up with
    /// [`Self::refresh_visibility`] so overlays track the new window.
    pub fn layout_mut(&mut self) -> &mut L {
        &mut self.layout
    }

    /// Shared handle to the document model
    pub fn document(&self) -> Arc<Mutex<D>> {
        self.bridge.document()
    }

    pub fn gesture_phase(&self, point_id: PointId) -> GesturePhase {
        self.tracker.phase(point_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.tracker.active_sessions()
    }

    pub fn active_pages(&self) -> Vec<PageId> {
        self.store.active_pages()
    }

    /// Swap the input policy; sessions already tracking keep going
    pub fn set_input_policy(&mut self, policy: InputPolicy) {
        self.tracker.set_policy(policy.clone());
        self.config.input_policy = policy;
    }

    /// Pen for strokes started from now on
    pub fn set_ink(&mut self, ink: InkStyle) {
        self.tracker.set_ink(ink);
        self.config.ink = ink;
    }

    /// Change the raster scale of `current_raster`; every overlay is recomposited
    pub fn set_raster_scale(&mut self, scale: f64) -> MarkupResult<()> {
        self.compositor.set_scale(scale)?;
        self.store.invalidate_all();
        self.config.raster_scale = scale;
        Ok(())
    }

    /// Route one pointer event through the gesture tracker.
    ///
    /// A rejected or out-of-state event is returned as an error and leaves
    /// every session and overlay as it was.
    pub fn handle_input(&mut self, event: &InputEvent) -> MarkupResult<()> {
        let stroke_event = match self.tracker.handle(&self.layout, event) {
            Ok(Some(stroke_event)) => stroke_event,
            Ok(None) => return Ok(()),
            Err(err) => {
                log::debug!("point {}: dropped {:?} event: {err}", event.point_id, event.phase);
                return Err(err);
            }
        };
        self.apply(stroke_event)
    }

    /// Interrupt every gesture (system gesture, app backgrounding).
    ///
    /// Returns how many sessions were cancelled; a second call returns 0.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.tracker.cancel_all();
        for event in &cancelled {
            self.store.clear_in_progress(event.page());
        }
        cancelled.len()
    }

    /// Apply visibility changes from the page layout
    pub fn on_visibility(&mut self, changes: &[VisibilityChange]) {
        for change in changes {
            match *change {
                VisibilityChange::Appeared(page) => {
                    if let Err(err) = self.acquire_overlay(page) {
                        log::warn!("{page}: could not acquire overlay: {err}");
                    }
                }
                VisibilityChange::Disappeared(page) => {
                    self.release_overlay(page);
                }
            }
        }
    }

    /// Ask the layout what changed and apply it
    pub fn refresh_visibility(&mut self) -> Vec<VisibilityChange> {
        let changes = self.layout.visibility_changes();
        self.on_visibility(&changes);
        changes
    }

    /// Build the page's overlay if it does not exist yet; idempotent
    pub fn acquire_overlay(&mut self, page: PageId) -> MarkupResult<()> {
        if self.store.is_active(page) {
            return Ok(());
        }
        let media_box = self
            .layout
            .page_media_box(page)
            .ok_or_else(|| MarkupError::invalid_state(format!("{page} is not part of the layout")))?;

        let loaded = match self.bridge.mode() {
            PersistenceMode::Inline => self.bridge.page_strokes(page).map(Some),
            PersistenceMode::Background => self.bridge.try_page_strokes(page),
        };
        let persisted = match loaded {
            Ok(Some(strokes)) => strokes,
            Ok(None) => {
                log::debug!("{page}: document busy, reload deferred");
                self.deferred_reloads.insert(page);
                Vec::new()
            }
            Err(err) => {
                log::warn!("{page}: could not reload persisted strokes: {err}");
                Vec::new()
            }
        };
        self.store.acquire(page, media_box, || persisted);
        Ok(())
    }

    /// Whether the page is still waiting for its persisted strokes
    pub fn is_reload_deferred(&self, page: PageId) -> bool {
        self.deferred_reloads.contains(&page)
    }

    /// Tear down the page's overlay. Open strokes on the page are cancelled.
    ///
    /// Returns `false` when the page had no overlay.
    pub fn release_overlay(&mut self, page: PageId) -> bool {
        for event in self.tracker.cancel_page(page) {
            log::debug!("{page}: released while drawing, {event:?}");
        }
        self.compositor.forget(page);
        self.deferred_reloads.remove(&page);
        let released = self.store.release(page);

        if released && self.config.save_on_release && self.dirty_since_save {
            if let Err(err) = self.save(None) {
                log::error!("{page}: save on release failed: {err}");
            }
        }
        released
    }

    /// Composited ink for a page at the configured raster scale
    pub fn current_raster(&mut self, page: PageId) -> MarkupResult<Arc<RgbaImage>> {
        self.acquire_overlay(page)?;
        self.store.render(page, &mut self.compositor)
    }

    /// Committed stroke count and bounds, plus the page's persistence backlog.
    ///
    /// Persisted strokes of a page whose reload is deferred are not counted
    /// until a later [`Self::poll`] merges them.
    pub fn annotation_summary(&mut self, page: PageId) -> MarkupResult<AnnotationSummary> {
        self.acquire_overlay(page)?;
        let summary = self
            .store
            .summary(page)
            .ok_or_else(|| MarkupError::invalid_state(format!("{page} has no active overlay")))?;
        Ok(AnnotationSummary {
            pending_flushes: self.bridge.pending_on(page),
            failed_flushes: self.bridge.failed_on(page),
            ..summary
        })
    }

    /// Write the document to `destination`, or to where it was opened from
    pub fn save(&mut self, destination: Option<&Path>) -> MarkupResult<()> {
        self.bridge.save(destination)?;
        self.dirty_since_save = false;
        Ok(())
    }

    /// Pick up finished persistence work and background composites.
    ///
    /// Pages with a new composite are marked dirty; redraw them.
    pub fn poll(&mut self) -> Vec<PersistenceEvent> {
        for page in self.compositor.poll() {
            self.store.mark_dirty(page);
        }
        let events = self.bridge.poll();
        self.observe(&events);
        self.reload_deferred();
        events
    }

    /// Block until persistence is idle or `timeout` passes, then poll
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<PersistenceEvent> {
        let mut events = self.bridge.wait_idle(timeout);
        self.observe(&events);
        events.extend(self.poll());
        events
    }

    /// Resubmit every failed flush. Never happens on its own.
    pub fn retry_failed_flushes(&mut self) -> usize {
        self.bridge.retry_failed()
    }

    /// Error from the last failed flush of `stroke`
    pub fn flush_failure(&self, stroke: StrokeId) -> Option<&MarkupError> {
        self.bridge.failure(stroke)
    }

    /// Whether any flush or save has not reported back yet
    pub fn is_persisting(&self) -> bool {
        self.bridge.is_busy()
    }

    fn apply(&mut self, event: StrokeEvent) -> MarkupResult<()> {
        match event {
            StrokeEvent::Began { point_id, page, stroke } => {
                let opened = self
                    .acquire_overlay(page)
                    .and_then(|()| self.store.update_in_progress(page, stroke));
                if let Err(err) = opened {
                    // Keep the tracker and the store in step.
                    self.tracker.on_cancel(point_id);
                    return Err(err);
                }
                Ok(())
            }
            StrokeEvent::Extended { page, sample, .. } => {
                self.store.extend_in_progress(page, sample)
            }
            StrokeEvent::Committed { page, stroke, .. } => {
                self.acquire_overlay(page)?;
                let stroke = self.store.commit_stroke(page, stroke)?;
                self.flush(page, stroke);
                Ok(())
            }
            StrokeEvent::Cancelled { page, .. } => {
                self.store.clear_in_progress(page);
                Ok(())
            }
            StrokeEvent::Discarded { page, reason, .. } => {
                self.store.clear_in_progress(page);
                Err(MarkupError::InputRejected(reason))
            }
        }
    }

    fn flush(&mut self, page: PageId, stroke: Arc<Stroke>) {
        let id = stroke.id();
        self.dirty_since_save = true;
        match self.bridge.flush(page, stroke) {
            Ok(()) if self.bridge.mode() == PersistenceMode::Inline => {
                self.store.mark_flushed(page, id);
                if self.config.autosave {
                    self.autosave();
                }
            }
            Ok(()) => {}
            // Already queued as a FlushFailed event for the shell.
            Err(err) => log::debug!("{page}: stroke {id} kept in memory after failed flush: {err}"),
        }
    }

    fn observe(&mut self, events: &[PersistenceEvent]) {
        for event in events {
            if let PersistenceEvent::Flushed { page, stroke } = event {
                self.store.mark_flushed(*page, *stroke);
                if self.config.autosave && self.bridge.mode() == PersistenceMode::Background {
                    self.autosave();
                }
            }
        }
    }

    fn reload_deferred(&mut self) {
        let pages: Vec<PageId> = self.deferred_reloads.iter().copied().collect();
        for page in pages {
            match self.bridge.try_page_strokes(page) {
                Ok(None) => continue,
                Ok(Some(strokes)) => {
                    if self.store.merge_persisted(page, strokes) > 0 {
                        // Cached and queued layers assumed the old stroke order.
                        self.compositor.forget(page);
                    }
                }
                Err(err) => log::warn!("{page}: could not reload persisted strokes: {err}"),
            }
            self.deferred_reloads.remove(&page);
        }
    }

    fn autosave(&mut self) {
        if let Err(err) = self.save(None) {
            log::error!("autosave failed: {err}");
        }
    }
}
