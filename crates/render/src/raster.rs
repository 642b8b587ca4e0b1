//! Stroke rasterization into RGBA image buffers
//!
//! Each stroke is first accumulated into a coverage mask (max coverage per
//! pixel) so overlapping segment caps do not darken translucent ink, then the
//! mask is blended over the target with source-over compositing.

use image::{Rgba, RgbaImage};
use pdf_markup_core::{
    BoundingBox, Color, MarkupResult, PagePoint, RasterFrame, Rect, Stroke, StrokeSample,
};

/// Thinnest line radius drawn, in pixels
const MIN_RADIUS_PX: f64 = 0.5;

/// Smallest stamp region side, in page points
const MIN_STAMP_SIDE_PT: f64 = 1.0;

/// Fully transparent image sized for `frame`
pub fn blank_raster(frame: &RasterFrame) -> RgbaImage {
    RgbaImage::new(frame.width_px(), frame.height_px())
}

/// Draw one stroke into `target`, which covers the region described by `frame`
pub fn draw_stroke(target: &mut RgbaImage, frame: &RasterFrame, stroke: &Stroke) {
    let samples = stroke.samples();
    if samples.is_empty() || target.width() == 0 || target.height() == 0 {
        return;
    }

    let Some(mut mask) = CoverageMask::for_bounds(target, frame, &stroke.ink_bounds()) else {
        return;
    };

    let scale = frame.scale();
    let style = stroke.style();
    let radius = |sample: &StrokeSample| (style.thickness(sample.pressure) * scale / 2.0).max(MIN_RADIUS_PX);

    if samples.len() == 1 {
        let (cx, cy) = frame.to_pixel(samples[0].point());
        let r = radius(&samples[0]);
        mask.capsule((cx, cy, r), (cx, cy, r));
    } else {
        for (a, b) in stroke.segments() {
            let (ax, ay) = frame.to_pixel(a.point());
            let (bx, by) = frame.to_pixel(b.point());
            mask.capsule((ax, ay, radius(a)), (bx, by, radius(b)));
        }
    }

    mask.composite(target, style.color);
}

/// Rasterize a single stroke into a standalone image covering its ink bounds.
///
/// Returns the image together with the page-space region it covers, which is
/// where the persisted stamp gets anchored.
pub fn rasterize_stamp(stroke: &Stroke, scale: f64) -> MarkupResult<(RgbaImage, BoundingBox)> {
    let mut region = stroke.ink_bounds();
    if region.width() < MIN_STAMP_SIDE_PT {
        let grow = (MIN_STAMP_SIDE_PT - region.width()) / 2.0;
        region.min_x -= grow;
        region.max_x += grow;
    }
    if region.height() < MIN_STAMP_SIDE_PT {
        let grow = (MIN_STAMP_SIDE_PT - region.height()) / 2.0;
        region.min_y -= grow;
        region.max_y += grow;
    }

    let frame = RasterFrame::new(region.to_rect(), scale)?;
    let mut image = blank_raster(&frame);
    draw_stroke(&mut image, &frame, stroke);
    Ok((image, region))
}

/// Pixel bounds `(min_x, min_y, max_x, max_y)` of every non-transparent pixel,
/// inclusive, or `None` for an empty image
pub fn coverage_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}

/// Page-space bounds of the drawn pixels in a raster covering `region`
pub fn coverage_bounds_in_page(
    image: &RgbaImage,
    region: Rect,
    scale: f64,
) -> MarkupResult<Option<BoundingBox>> {
    let frame = RasterFrame::new(region, scale)?;
    Ok(coverage_bounds(image).map(|(x0, y0, x1, y1)| {
        let mut bbox = BoundingBox::around(frame.to_page(f64::from(x0), f64::from(y0)));
        bbox.include(frame.to_page(f64::from(x1) + 1.0, f64::from(y1) + 1.0));
        bbox
    }))
}

/// Source-over blend of `color` at `coverage` onto a straight-alpha pixel
fn blend_over(base: Rgba<u8>, color: Color, coverage: f32) -> Rgba<u8> {
    let src_a = f32::from(color.a) / 255.0 * coverage.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return base;
    }
    if src_a >= 1.0 {
        return Rgba([color.r, color.g, color.b, 255]);
    }

    let dst_a = f32::from(base[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |src: u8, dst: u8| {
        let value = (f32::from(src) * src_a + f32::from(dst) * dst_a * (1.0 - src_a)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(color.r, base[0]),
        channel(color.g, base[1]),
        channel(color.b, base[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Per-pixel coverage over a clipped window of the target image
struct CoverageMask {
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
    coverage: Vec<f32>,
}

impl CoverageMask {
    fn for_bounds(target: &RgbaImage, frame: &RasterFrame, bounds: &BoundingBox) -> Option<Self> {
        let (left, top) = frame.to_pixel(PagePoint::new(bounds.min_x, bounds.max_y));
        let (right, bottom) = frame.to_pixel(PagePoint::new(bounds.max_x, bounds.min_y));

        // One extra pixel covers the minimum radius and anti-aliased edge.
        let min_x = (left - 1.0).floor().max(0.0);
        let min_y = (top - 1.0).floor().max(0.0);
        let max_x = (right + 1.0).ceil().min(f64::from(target.width()));
        let max_y = (bottom + 1.0).ceil().min(f64::from(target.height()));
        if !(min_x < max_x && min_y < max_y) {
            return None;
        }

        let width = (max_x - min_x) as u32;
        let height = (max_y - min_y) as u32;
        Some(Self {
            origin_x: min_x as u32,
            origin_y: min_y as u32,
            width,
            height,
            coverage: vec![0.0; width as usize * height as usize],
        })
    }

    /// Accumulate a tapered capsule from `a` to `b`, each given as `(x, y, radius)` in pixels
    fn capsule(&mut self, a: (f64, f64, f64), b: (f64, f64, f64)) {
        let (ax, ay, ar) = a;
        let (bx, by, br) = b;
        let reach = ar.max(br) + 1.0;

        let x_start = ((ax.min(bx) - reach).floor() - f64::from(self.origin_x)).max(0.0) as u32;
        let y_start = ((ay.min(by) - reach).floor() - f64::from(self.origin_y)).max(0.0) as u32;
        let x_end = ((ax.max(bx) + reach).ceil() - f64::from(self.origin_x)).min(f64::from(self.width));
        let y_end = ((ay.max(by) + reach).ceil() - f64::from(self.origin_y)).min(f64::from(self.height));
        if x_end <= 0.0 || y_end <= 0.0 {
            return;
        }
        let (x_end, y_end) = (x_end as u32, y_end as u32);

        let dx = bx - ax;
        let dy = by - ay;
        let length_sq = dx * dx + dy * dy;

        for my in y_start..y_end {
            let py = f64::from(self.origin_y + my) + 0.5;
            for mx in x_start..x_end {
                let px = f64::from(self.origin_x + mx) + 0.5;

                let t = if length_sq < 1e-12 {
                    0.0
                } else {
                    (((px - ax) * dx + (py - ay) * dy) / length_sq).clamp(0.0, 1.0)
                };
                let cx = ax + t * dx;
                let cy = ay + t * dy;
                let radius = ar + (br - ar) * t;
                let distance = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
                let cover = (radius + 0.5 - distance).clamp(0.0, 1.0) as f32;

                let slot = &mut self.coverage[(my * self.width + mx) as usize];
                if cover > *slot {
                    *slot = cover;
                }
            }
        }
    }

    fn composite(&self, target: &mut RgbaImage, color: Color) {
        for my in 0..self.height {
            for mx in 0..self.width {
                let cover = self.coverage[(my * self.width + mx) as usize];
                if cover <= 0.0 {
                    continue;
                }
                let (x, y) = (self.origin_x + mx, self.origin_y + my);
                let base = *target.get_pixel(x, y);
                target.put_pixel(x, y, blend_over(base, color, cover));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_markup_core::InkStyle;

    fn stroke_with(style: InkStyle, points: &[(f64, f64)]) -> Stroke {
        let mut samples = points
            .iter()
            .map(|&(x, y)| StrokeSample { x, y, pressure: 1.0, timestamp: 0 });
        let mut stroke = Stroke::begin(style, samples.next().unwrap());
        for sample in samples {
            stroke.push(sample).unwrap();
        }
        stroke.finalized()
    }

    fn stroke(points: &[(f64, f64)], width: f64) -> Stroke {
        stroke_with(InkStyle::new(Color::BLUE, width), points)
    }

    #[test]
    fn raster_bounds_match_stroke_in_page_orientation() {
        let media = Rect::from_size(100.0, 100.0);
        let frame = RasterFrame::new(media, 1.0).unwrap();
        let mut image = blank_raster(&frame);
        draw_stroke(&mut image, &frame, &stroke(&[(10.0, 10.0), (50.0, 50.0)], 1.0));

        // Page y = 10..50 lands on raster rows 50..90 after the flip.
        let (x0, y0, x1, y1) = coverage_bounds(&image).unwrap();
        assert!((9..=10).contains(&x0), "x0 = {x0}");
        assert!((49..=50).contains(&x1), "x1 = {x1}");
        assert!((49..=50).contains(&y0), "y0 = {y0}");
        assert!((89..=90).contains(&y1), "y1 = {y1}");

        let page_bounds = coverage_bounds_in_page(&image, media, 1.0).unwrap().unwrap();
        assert!((page_bounds.min_x - 10.0).abs() <= 1.0);
        assert!((page_bounds.min_y - 10.0).abs() <= 1.0);
        assert!((page_bounds.max_x - 50.0).abs() <= 1.0);
        assert!((page_bounds.max_y - 50.0).abs() <= 1.0);
    }

    #[test]
    fn single_sample_renders_a_dot() {
        let frame = RasterFrame::new(Rect::from_size(20.0, 20.0), 1.0).unwrap();
        let mut image = blank_raster(&frame);
        draw_stroke(&mut image, &frame, &stroke(&[(10.0, 10.0)], 4.0));

        let center = image.get_pixel(10, 9);
        assert_eq!(center[3], 255);
        assert_eq!(image.get_pixel(0, 0)[3], 0);
        let (x0, _, x1, _) = coverage_bounds(&image).unwrap();
        assert!(x1 - x0 <= 5);
    }

    #[test]
    fn strokes_outside_the_frame_are_clipped() {
        let frame = RasterFrame::new(Rect::from_size(10.0, 10.0), 1.0).unwrap();
        let mut image = blank_raster(&frame);
        draw_stroke(&mut image, &frame, &stroke(&[(50.0, 50.0), (60.0, 60.0)], 2.0));
        assert!(coverage_bounds(&image).is_none());
    }

    #[test]
    fn translucent_overlap_does_not_darken() {
        let frame = RasterFrame::new(Rect::from_size(40.0, 40.0), 1.0).unwrap();
        let mut image = blank_raster(&frame);
        let translucent = InkStyle::new(Color::new(0, 0, 0, 128), 6.0);
        let s = stroke_with(translucent, &[(5.0, 20.0), (20.0, 20.0), (35.0, 20.0)]);
        draw_stroke(&mut image, &frame, &s);

        // The joint at x = 20 and a plain run at x = 12 carry the same alpha.
        assert_eq!(image.get_pixel(20, 19)[3], image.get_pixel(12, 19)[3]);
    }

    #[test]
    fn stamp_covers_ink_bounds() {
        let s = stroke(&[(10.0, 10.0), (30.0, 20.0)], 2.0);
        let (image, region) = rasterize_stamp(&s, 2.0).unwrap();
        assert_eq!(region.min_x, 9.0);
        assert_eq!(region.max_y, 21.0);
        assert_eq!(image.width(), 44);
        assert_eq!(image.height(), 24);
        assert!(coverage_bounds(&image).is_some());
    }

    #[test]
    fn blend_over_mixes_alpha() {
        let base = Rgba([255, 255, 255, 255]);
        let out = blend_over(base, Color::new(0, 0, 0, 255), 0.5);
        assert_eq!(out[3], 255);
        assert!((126..=129).contains(&out[0]));
        assert_eq!(blend_over(base, Color::BLACK, 0.0), base);
    }
}
