//! Gesture tracking: pointer events in, stroke lifecycle events out
//!
//! Each input point runs its own small state machine:
//!
//! ```text
//! Idle --begin--> Tracking --end--> (commit) --> Idle
//!                    |
//!                    +--cancel--> Idle
//! ```
//!
//! A session only exists while its point is Tracking. The target page is
//! resolved once, at begin, and stays locked for the session's lifetime.

use crate::config::InputPolicy;
use crate::input::{InputEvent, InputPhase, PointId, PointerKind};
use crate::layout::PageLayout;
use pdf_markup_core::{
    CoordinateFrame, InkStyle, MarkupError, MarkupResult, PageId, RejectReason, ScreenPoint,
    Stroke, StrokeSample,
};
use std::collections::HashMap;

/// Externally visible state of one input point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    Tracking,
}

/// Stroke lifecycle deltas, consumed by the overlay store
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeEvent {
    /// A session opened; carries the one-sample open stroke
    Began { point_id: PointId, page: PageId, stroke: Stroke },
    Extended { point_id: PointId, page: PageId, sample: StrokeSample },
    /// The finalized stroke, ready to commit
    Committed { point_id: PointId, page: PageId, stroke: Stroke },
    Cancelled { point_id: PointId, page: PageId },
    /// The session ended but the policy refused the stroke
    Discarded { point_id: PointId, page: PageId, reason: RejectReason },
}

impl StrokeEvent {
    pub fn page(&self) -> PageId {
        match self {
            StrokeEvent::Began { page, .. }
            | StrokeEvent::Extended { page, .. }
            | StrokeEvent::Committed { page, .. }
            | StrokeEvent::Cancelled { page, .. }
            | StrokeEvent::Discarded { page, .. } => *page,
        }
    }
}

#[derive(Debug)]
struct GestureSession {
    page: PageId,
    frame: CoordinateFrame,
    stroke: Stroke,
    screen_pos: ScreenPoint,
}

impl GestureSession {
    /// Map a screen position into this session's page, clamped to the media box
    fn sample(&self, screen_pos: ScreenPoint, pressure: f32, timestamp: u64) -> StrokeSample {
        let point = self.frame.media_box().clamp_point(self.frame.to_page_space(screen_pos));
        StrokeSample::new(point, pressure, timestamp)
    }
}

/// Owns every active gesture session, keyed by input point
#[derive(Debug)]
pub struct GestureTracker {
    policy: InputPolicy,
    ink: InkStyle,
    sessions: HashMap<PointId, GestureSession>,
}

impl GestureTracker {
    pub fn new(policy: InputPolicy, ink: InkStyle) -> Self {
        Self { policy, ink, sessions: HashMap::new() }
    }

    pub fn policy(&self) -> &InputPolicy {
        &self.policy
    }

    /// Replace the policy; running sessions are left alone
    pub fn set_policy(&mut self, policy: InputPolicy) {
        self.policy = policy;
    }

    pub fn ink(&self) -> InkStyle {
        self.ink
    }

    /// Pen for strokes started from now on
    pub fn set_ink(&mut self, ink: InkStyle) {
        self.ink = ink;
    }

    pub fn phase(&self, point_id: PointId) -> GesturePhase {
        if self.sessions.contains_key(&point_id) {
            GesturePhase::Tracking
        } else {
            GesturePhase::Idle
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Page locked by a tracking point
    pub fn session_page(&self, point_id: PointId) -> Option<PageId> {
        self.sessions.get(&point_id).map(|session| session.page)
    }

    /// Stroke being built by a tracking point
    pub fn open_stroke(&self, point_id: PointId) -> Option<&Stroke> {
        self.sessions.get(&point_id).map(|session| &session.stroke)
    }

    /// Last screen position seen for a tracking point
    pub fn screen_position(&self, point_id: PointId) -> Option<ScreenPoint> {
        self.sessions.get(&point_id).map(|session| session.screen_pos)
    }

    /// Dispatch a raw event by phase
    pub fn handle(
        &mut self,
        layout: &dyn PageLayout,
        event: &InputEvent,
    ) -> MarkupResult<Option<StrokeEvent>> {
        match event.phase {
            InputPhase::Began => self.on_begin(layout, event).map(Some),
            InputPhase::Moved => self.on_extend(layout, event).map(Some),
            InputPhase::Ended => self.on_end(layout, event).map(Some),
            InputPhase::Cancelled => Ok(self.on_cancel(event.point_id)),
        }
    }

    /// Open a session if the policy and layout allow it
    pub fn on_begin(
        &mut self,
        layout: &dyn PageLayout,
        event: &InputEvent,
    ) -> MarkupResult<StrokeEvent> {
        let point_id = event.point_id;
        self.check_admission(point_id, event.kind)?;

        let page = layout
            .hit_test_page(event.screen_pos)
            .ok_or(MarkupError::UnresolvedPage(event.screen_pos))?;
        if self.sessions.values().any(|session| session.page == page) {
            return Err(MarkupError::InputRejected(RejectReason::PageBusy));
        }

        let frame = layout.coordinate_frame(page)?;
        let point = frame.media_box().clamp_point(frame.to_page_space(event.screen_pos));
        let stroke =
            Stroke::begin(self.ink, StrokeSample::new(point, event.pressure, event.timestamp));

        log::trace!("point {point_id}: began stroke {} on {page}", stroke.id());
        self.sessions.insert(
            point_id,
            GestureSession { page, frame, stroke: stroke.clone(), screen_pos: event.screen_pos },
        );
        Ok(StrokeEvent::Began { point_id, page, stroke })
    }

    /// Append a sample to the point's open stroke
    pub fn on_extend(
        &mut self,
        layout: &dyn PageLayout,
        event: &InputEvent,
    ) -> MarkupResult<StrokeEvent> {
        let point_id = event.point_id;
        let session = self
            .sessions
            .get_mut(&point_id)
            .ok_or_else(|| MarkupError::invalid_state(format!("point {point_id} is not tracking")))?;

        // The page may have moved under the pointer since begin (scroll, zoom).
        session.frame = layout.coordinate_frame(session.page)?;
        let sample = session.sample(event.screen_pos, event.pressure, event.timestamp);
        session.stroke.push(sample)?;
        session.screen_pos = event.screen_pos;

        Ok(StrokeEvent::Extended { point_id, page: session.page, sample })
    }

    /// Close the point's session and hand over the finalized stroke
    pub fn on_end(&mut self, layout: &dyn PageLayout, event: &InputEvent) -> MarkupResult<StrokeEvent> {
        let point_id = event.point_id;
        let mut session = self
            .sessions
            .remove(&point_id)
            .ok_or_else(|| MarkupError::invalid_state(format!("point {point_id} is not tracking")))?;
        let page = session.page;

        // From here on the session is gone; a bad final point only loses that point.
        match layout.coordinate_frame(page) {
            Ok(frame) => {
                session.frame = frame;
                let sample = session.sample(event.screen_pos, event.pressure, event.timestamp);
                let repeats_last =
                    session.stroke.last_sample().is_some_and(|last| last.point() == sample.point());
                if !repeats_last {
                    session.stroke.push(sample)?;
                }
            }
            Err(err) => log::warn!("point {point_id}: dropping final sample on {page}: {err}"),
        }

        let stroke = session.stroke.finalized();
        if stroke.len() < self.policy.min_samples {
            log::debug!(
                "point {point_id}: discarding stroke with {} samples (minimum {})",
                stroke.len(),
                self.policy.min_samples
            );
            return Ok(StrokeEvent::Discarded {
                point_id,
                page,
                reason: RejectReason::BelowMinimumSamples,
            });
        }

        log::trace!("point {point_id}: committed stroke {} on {page}", stroke.id());
        Ok(StrokeEvent::Committed { point_id, page, stroke })
    }

    /// Discard the point's session. Idempotent: `None` when it was not tracking.
    pub fn on_cancel(&mut self, point_id: PointId) -> Option<StrokeEvent> {
        let session = self.sessions.remove(&point_id)?;
        log::debug!("point {point_id}: cancelled stroke on {}", session.page);
        Some(StrokeEvent::Cancelled { point_id, page: session.page })
    }

    /// Cancel every session drawing on `page`
    pub fn cancel_page(&mut self, page: PageId) -> Vec<StrokeEvent> {
        let points: Vec<PointId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.page == page)
            .map(|(&point_id, _)| point_id)
            .collect();
        points.into_iter().filter_map(|point_id| self.on_cancel(point_id)).collect()
    }

    /// Cancel every session (system gesture, app backgrounding)
    pub fn cancel_all(&mut self) -> Vec<StrokeEvent> {
        let points: Vec<PointId> = self.sessions.keys().copied().collect();
        points.into_iter().filter_map(|point_id| self.on_cancel(point_id)).collect()
    }

    fn check_admission(&self, point_id: PointId, kind: PointerKind) -> MarkupResult<()> {
        if self.sessions.contains_key(&point_id) {
            return Err(MarkupError::invalid_state(format!("point {point_id} is already tracking")));
        }
        if !self.policy.pointers.accepts(kind) {
            return Err(MarkupError::InputRejected(RejectReason::PointerKindExcluded));
        }
        if self.policy.single_point_only && !self.sessions.is_empty() {
            return Err(MarkupError::InputRejected(RejectReason::SecondaryPoint));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointerFilter;
    use crate::layout::{ContinuousLayout, PageGeometry};
    use pdf_markup_core::{PagePoint, Rect, Rotation};

    /// Two 100x100 pages at 1:1, the first at screen (50, 20), the second at (50, 140)
    fn layout() -> ContinuousLayout {
        let page = PageGeometry::new(Rect::from_size(100.0, 100.0), Rotation::Deg0);
        ContinuousLayout::new(vec![page; 2], 200.0, 400.0)
    }

    fn event(point_id: PointId, phase: InputPhase, x: f64, y: f64) -> InputEvent {
        InputEvent::new(point_id, PointerKind::Touch, phase, ScreenPoint::new(x, y))
    }

    fn tracker() -> GestureTracker {
        GestureTracker::new(InputPolicy::default(), InkStyle::default())
    }

    #[test]
    fn begin_extend_end_commits_stroke_in_page_space() {
        let layout = layout();
        let mut tracker = tracker();

        let began = tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 110.0)).unwrap();
        let StrokeEvent::Began { page, stroke, .. } = began else { panic!("expected Began") };
        assert_eq!(page, PageId(0));
        assert_eq!(stroke.samples()[0].point(), PagePoint::new(10.0, 10.0));
        assert_eq!(tracker.phase(1), GesturePhase::Tracking);

        tracker.on_extend(&layout, &event(1, InputPhase::Moved, 80.0, 90.0)).unwrap();
        let ended = tracker.on_end(&layout, &event(1, InputPhase::Ended, 100.0, 70.0)).unwrap();

        let StrokeEvent::Committed { stroke, .. } = ended else { panic!("expected Committed") };
        assert!(stroke.is_finalized());
        let points: Vec<_> = stroke.samples().iter().map(|s| s.point()).collect();
        assert_eq!(
            points,
            vec![PagePoint::new(10.0, 10.0), PagePoint::new(30.0, 30.0), PagePoint::new(50.0, 50.0)]
        );
        assert_eq!(tracker.phase(1), GesturePhase::Idle);
    }

    #[test]
    fn tap_commits_a_single_point_dot() {
        let layout = layout();
        let mut tracker = tracker();
        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();
        let ended = tracker.on_end(&layout, &event(1, InputPhase::Ended, 60.0, 30.0)).unwrap();

        let StrokeEvent::Committed { stroke, .. } = ended else { panic!("expected Committed") };
        assert!(stroke.is_dot());
    }

    #[test]
    fn minimum_samples_discards_short_strokes() {
        let layout = layout();
        let policy = InputPolicy { min_samples: 3, ..InputPolicy::default() };
        let mut tracker = GestureTracker::new(policy, InkStyle::default());

        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();
        let ended = tracker.on_end(&layout, &event(1, InputPhase::Ended, 70.0, 30.0)).unwrap();
        assert!(matches!(
            ended,
            StrokeEvent::Discarded { reason: RejectReason::BelowMinimumSamples, .. }
        ));
        assert_eq!(tracker.phase(1), GesturePhase::Idle);
    }

    #[test]
    fn samples_outside_media_box_are_clamped() {
        let layout = layout();
        let mut tracker = tracker();
        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();

        let extended = tracker.on_extend(&layout, &event(1, InputPhase::Moved, 500.0, 30.0)).unwrap();
        let StrokeEvent::Extended { sample, .. } = extended else { panic!("expected Extended") };
        assert_eq!(sample.point(), PagePoint::new(100.0, 90.0));

        let bbox = tracker.open_stroke(1).unwrap().bounding_box();
        assert!(bbox.max_x <= 100.0);
    }

    #[test]
    fn begin_rejections_create_no_session() {
        let layout = layout();
        let policy = InputPolicy {
            pointers: PointerFilter::StylusOnly,
            single_point_only: true,
            ..InputPolicy::default()
        };
        let mut tracker = GestureTracker::new(policy, InkStyle::default());

        let err = tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap_err();
        assert_eq!(err, MarkupError::InputRejected(RejectReason::PointerKindExcluded));

        let mut stylus = event(2, InputPhase::Began, 5.0, 5.0);
        stylus.kind = PointerKind::Stylus;
        assert!(matches!(tracker.on_begin(&layout, &stylus), Err(MarkupError::UnresolvedPage(_))));
        assert_eq!(tracker.active_sessions(), 0);

        stylus.screen_pos = ScreenPoint::new(60.0, 30.0);
        tracker.on_begin(&layout, &stylus).unwrap();
        let mut second = event(3, InputPhase::Began, 60.0, 150.0);
        second.kind = PointerKind::Stylus;
        assert_eq!(
            tracker.on_begin(&layout, &second).unwrap_err(),
            MarkupError::InputRejected(RejectReason::SecondaryPoint)
        );
        assert_eq!(tracker.active_sessions(), 1);
    }

    #[test]
    fn second_point_on_same_page_is_refused() {
        let layout = layout();
        let mut tracker = tracker();
        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();

        let err = tracker.on_begin(&layout, &event(2, InputPhase::Began, 90.0, 60.0)).unwrap_err();
        assert_eq!(err, MarkupError::InputRejected(RejectReason::PageBusy));
        tracker.on_begin(&layout, &event(2, InputPhase::Began, 60.0, 150.0)).unwrap();
        assert_eq!(tracker.active_sessions(), 2);
    }

    #[test]
    fn events_without_session_are_invalid_state() {
        let layout = layout();
        let mut tracker = tracker();
        assert!(matches!(
            tracker.on_extend(&layout, &event(9, InputPhase::Moved, 60.0, 30.0)),
            Err(MarkupError::InvalidState(_))
        ));
        assert!(matches!(
            tracker.on_end(&layout, &event(9, InputPhase::Ended, 60.0, 30.0)),
            Err(MarkupError::InvalidState(_))
        ));

        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();
        assert!(matches!(
            tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)),
            Err(MarkupError::InvalidState(_))
        ));
    }

    #[test]
    fn cancel_is_idempotent() {
        let layout = layout();
        let mut tracker = tracker();
        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();

        assert!(matches!(tracker.on_cancel(1), Some(StrokeEvent::Cancelled { .. })));
        assert_eq!(tracker.on_cancel(1), None);
        assert_eq!(tracker.phase(1), GesturePhase::Idle);
    }

    #[test]
    fn cancel_page_only_touches_that_page() {
        let layout = layout();
        let mut tracker = tracker();
        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 30.0)).unwrap();
        tracker.on_begin(&layout, &event(2, InputPhase::Began, 60.0, 150.0)).unwrap();

        let cancelled = tracker.cancel_page(PageId(1));
        assert_eq!(cancelled, vec![StrokeEvent::Cancelled { point_id: 2, page: PageId(1) }]);
        assert_eq!(tracker.phase(1), GesturePhase::Tracking);

        assert_eq!(tracker.cancel_all().len(), 1);
        assert!(tracker.cancel_all().is_empty());
    }

    #[test]
    fn page_stays_locked_when_pointer_crosses_pages() {
        let layout = layout();
        let mut tracker = tracker();
        tracker.on_begin(&layout, &event(1, InputPhase::Began, 60.0, 110.0)).unwrap();

        let extended = tracker.on_extend(&layout, &event(1, InputPhase::Moved, 60.0, 150.0)).unwrap();
        assert_eq!(extended.page(), PageId(0));
        let StrokeEvent::Extended { sample, .. } = extended else { panic!("expected Extended") };
        assert_eq!(sample.point(), PagePoint::new(10.0, 0.0));
    }
}
