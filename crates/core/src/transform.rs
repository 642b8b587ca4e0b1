//! Coordinate transforms between screen, page and raster space
//!
//! Screen space is the scrollable container (origin top-left, Y down). Page
//! space is the page's own content space (origin bottom-left of the media
//! box, Y up, points). A page is displayed inside its screen rect after a
//! clockwise rotation of 0/90/180/270 degrees and a uniform or per-axis
//! display scale derived from the rect and media box sizes.
//!
//! Everything here is pure: the same inputs always give the same outputs and
//! `to_screen_space(to_page_space(p)) == p` up to floating-point error.

use crate::error::{MarkupError, MarkupResult};
use crate::geometry::{PagePoint, Rect, Rotation, ScreenPoint};

/// Placement of one page on screen, used to map points in both directions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateFrame {
    screen_rect: Rect,
    media_box: Rect,
    rotation: Rotation,
    scale_x: f64,
    scale_y: f64,
}

impl CoordinateFrame {
    /// Build a frame, rejecting zero or negative area geometry
    pub fn new(screen_rect: Rect, media_box: Rect, rotation: Rotation) -> MarkupResult<Self> {
        if screen_rect.is_degenerate() {
            return Err(MarkupError::degenerate(format!(
                "page screen rect {}x{} has no area",
                screen_rect.width, screen_rect.height
            )));
        }
        if media_box.is_degenerate() {
            return Err(MarkupError::degenerate(format!(
                "media box {}x{} has no area",
                media_box.width, media_box.height
            )));
        }

        let (rotated_width, rotated_height) = if rotation.is_quarter_turn() {
            (media_box.height, media_box.width)
        } else {
            (media_box.width, media_box.height)
        };

        Ok(Self {
            screen_rect,
            media_box,
            rotation,
            scale_x: screen_rect.width / rotated_width,
            scale_y: screen_rect.height / rotated_height,
        })
    }

    pub fn screen_rect(&self) -> Rect {
        self.screen_rect
    }

    pub fn media_box(&self) -> Rect {
        self.media_box
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Horizontal screen pixels per page point
    pub fn display_scale(&self) -> f64 {
        self.scale_x
    }

    /// Map a screen point into page space
    pub fn to_page_space(&self, point: ScreenPoint) -> PagePoint {
        let mw = self.media_box.width;
        let mh = self.media_box.height;

        // Unscaled position on the displayed (rotated) page, top-left origin.
        let u = (point.x - self.screen_rect.x) / self.scale_x;
        let v = (point.y - self.screen_rect.y) / self.scale_y;

        // Undo the clockwise display rotation.
        let (a, b) = match self.rotation {
            Rotation::Deg0 => (u, v),
            Rotation::Deg90 => (v, mh - u),
            Rotation::Deg180 => (mw - u, mh - v),
            Rotation::Deg270 => (mw - v, u),
        };

        PagePoint { x: self.media_box.x + a, y: self.media_box.y + (mh - b) }
    }

    /// Map a page point onto the screen; exact inverse of [`Self::to_page_space`]
    pub fn to_screen_space(&self, point: PagePoint) -> ScreenPoint {
        let mw = self.media_box.width;
        let mh = self.media_box.height;

        let a = point.x - self.media_box.x;
        let b = mh - (point.y - self.media_box.y);

        let (u, v) = match self.rotation {
            Rotation::Deg0 => (a, b),
            Rotation::Deg90 => (mh - b, a),
            Rotation::Deg180 => (mw - a, mh - b),
            Rotation::Deg270 => (b, mw - a),
        };

        ScreenPoint {
            x: self.screen_rect.x + u * self.scale_x,
            y: self.screen_rect.y + v * self.scale_y,
        }
    }
}

/// Map a screen point into a page's content space
pub fn to_page_space(
    screen_point: ScreenPoint,
    page_screen_rect: Rect,
    page_media_box: Rect,
    rotation: Rotation,
) -> MarkupResult<PagePoint> {
    Ok(CoordinateFrame::new(page_screen_rect, page_media_box, rotation)?.to_page_space(screen_point))
}

/// Map a page point back to screen space
pub fn to_screen_space(
    page_point: PagePoint,
    page_screen_rect: Rect,
    page_media_box: Rect,
    rotation: Rotation,
) -> MarkupResult<ScreenPoint> {
    Ok(CoordinateFrame::new(page_screen_rect, page_media_box, rotation)?.to_screen_space(page_point))
}

/// Mapping from page space into an image buffer covering the media box.
///
/// The buffer is in the page's native (unrotated) orientation with a
/// top-left origin, so the same vertical flip as the screen mapping applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterFrame {
    origin_x: f64,
    top_y: f64,
    scale: f64,
    width_px: u32,
    height_px: u32,
}

impl RasterFrame {
    /// Frame for an arbitrary page-space region rendered at `scale` pixels per point
    pub fn new(region: Rect, scale: f64) -> MarkupResult<Self> {
        if region.is_degenerate() {
            return Err(MarkupError::degenerate("raster region has no area"));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(MarkupError::degenerate(format!("raster scale {scale} must be positive")));
        }

        Ok(Self {
            origin_x: region.x,
            top_y: region.max_y(),
            scale,
            width_px: (region.width * scale).ceil().max(1.0) as u32,
            height_px: (region.height * scale).ceil().max(1.0) as u32,
        })
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn height_px(&self) -> u32 {
        self.height_px
    }

    /// Pixels per page point
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Page point to continuous pixel coordinates (top-left origin)
    pub fn to_pixel(&self, point: PagePoint) -> (f64, f64) {
        ((point.x - self.origin_x) * self.scale, (self.top_y - point.y) * self.scale)
    }

    /// Continuous pixel coordinates back to a page point
    pub fn to_page(&self, px: f64, py: f64) -> PagePoint {
        PagePoint { x: self.origin_x + px / self.scale, y: self.top_y - py / self.scale }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-6;

    fn assert_close(a: ScreenPoint, b: ScreenPoint) {
        assert!((a.x - b.x).abs() < EPSILON && (a.y - b.y).abs() < EPSILON, "{a:?} != {b:?}");
    }

    #[test]
    fn round_trip_holds_for_every_rotation() {
        let media = Rect::new(0.0, 0.0, 612.0, 792.0);

        for rotation in Rotation::ALL {
            let screen = if rotation.is_quarter_turn() {
                Rect::new(40.0, 1200.0, 792.0 * 1.5, 612.0 * 1.5)
            } else {
                Rect::new(40.0, 1200.0, 612.0 * 1.5, 792.0 * 1.5)
            };
            let frame = CoordinateFrame::new(screen, media, rotation).unwrap();

            for i in 0..=10 {
                for j in 0..=10 {
                    let p = ScreenPoint::new(
                        screen.x + screen.width * i as f64 / 10.0,
                        screen.y + screen.height * j as f64 / 10.0,
                    );
                    let page = frame.to_page_space(p);
                    assert!(
                        page.x > -EPSILON && page.x < 612.0 + EPSILON,
                        "{rotation:?} {page:?}"
                    );
                    assert!(
                        page.y > -EPSILON && page.y < 792.0 + EPSILON,
                        "{rotation:?} {page:?}"
                    );
                    assert_close(frame.to_screen_space(page), p);
                }
            }
        }
    }

    #[test]
    fn y_axis_flips_between_spaces() {
        let frame = CoordinateFrame::new(
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Rect::from_size(100.0, 100.0),
            Rotation::Deg0,
        )
        .unwrap();

        // Screen top-left is the page's top-left, which is y = height in page space.
        assert_eq!(frame.to_page_space(ScreenPoint::new(0.0, 0.0)), PagePoint::new(0.0, 100.0));
        assert_eq!(frame.to_page_space(ScreenPoint::new(10.0, 90.0)), PagePoint::new(10.0, 10.0));
    }

    #[test]
    fn display_scale_is_applied() {
        let frame = CoordinateFrame::new(
            Rect::new(20.0, 30.0, 200.0, 400.0),
            Rect::from_size(100.0, 200.0),
            Rotation::Deg0,
        )
        .unwrap();

        assert_eq!(frame.display_scale(), 2.0);
        assert_eq!(frame.to_page_space(ScreenPoint::new(120.0, 30.0)), PagePoint::new(50.0, 200.0));
    }

    #[test]
    fn quarter_turn_maps_page_top_left_to_screen_top_right() {
        let frame = CoordinateFrame::new(
            Rect::new(0.0, 0.0, 200.0, 100.0),
            Rect::from_size(100.0, 200.0),
            Rotation::Deg90,
        )
        .unwrap();

        let top_left_of_page = PagePoint::new(0.0, 200.0);
        assert_close(frame.to_screen_space(top_left_of_page), ScreenPoint::new(200.0, 0.0));
    }

    #[test]
    fn offset_media_box_is_respected() {
        let media = Rect::new(50.0, 50.0, 100.0, 100.0);
        let point = to_page_space(
            ScreenPoint::new(0.0, 100.0),
            Rect::new(0.0, 0.0, 100.0, 100.0),
            media,
            Rotation::Deg0,
        )
        .unwrap();
        assert_eq!(point, PagePoint::new(50.0, 50.0));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let err = to_page_space(
            ScreenPoint::new(0.0, 0.0),
            Rect::new(0.0, 0.0, 0.0, 10.0),
            Rect::from_size(10.0, 10.0),
            Rotation::Deg0,
        )
        .unwrap_err();
        assert!(matches!(err, MarkupError::DegenerateTransform(_)));

        assert!(to_screen_space(
            PagePoint::new(0.0, 0.0),
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Rect::from_size(-10.0, 10.0),
            Rotation::Deg90,
        )
        .is_err());
    }

    #[test]
    fn raster_frame_flips_vertically() {
        let frame = RasterFrame::new(Rect::from_size(100.0, 100.0), 2.0).unwrap();
        assert_eq!((frame.width_px(), frame.height_px()), (200, 200));
        assert_eq!(frame.to_pixel(PagePoint::new(10.0, 10.0)), (20.0, 180.0));
        assert_eq!(frame.to_page(20.0, 180.0), PagePoint::new(10.0, 10.0));
        assert!(RasterFrame::new(Rect::from_size(10.0, 10.0), 0.0).is_err());
    }
}
