//! Freehand stroke model
//!
//! A stroke is an ordered run of samples in a single page's content space.
//! While open it accepts appends and keeps its bounding box current; once
//! finalized it is closed to further mutation and can be shared by value or
//! behind an `Arc` with compositing and persistence.

use crate::error::{MarkupError, MarkupResult};
use crate::geometry::{BoundingBox, PagePoint};
use serde::{Deserialize, Serialize};

/// Stable identifier for a stroke
///
/// Generated using UUID v4; persisted with the stroke so a reloaded stroke
/// keeps its identity.
pub type StrokeId = uuid::Uuid;

/// Pressure factor applied to the base width at zero pressure
const MIN_PRESSURE_FACTOR: f64 = 0.25;

/// One input sample in page space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeSample {
    pub x: f64,
    pub y: f64,
    pub pressure: f32,
    pub timestamp: u64,
}

impl StrokeSample {
    pub fn new(point: PagePoint, pressure: f32, timestamp: u64) -> Self {
        Self { x: point.x, y: point.y, pressure, timestamp }
    }

    pub fn point(&self) -> PagePoint {
        PagePoint::new(self.x, self.y)
    }
}

/// RGBA color representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
}

/// Pen appearance for a stroke
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InkStyle {
    pub color: Color,
    /// Nominal width in page points at full pressure
    pub width: f64,
}

impl InkStyle {
    pub fn new(color: Color, width: f64) -> Self {
        Self { color, width }
    }

    /// Line thickness in page points for a given sample pressure.
    ///
    /// Pressure is normalized to 0..=1; a zero or non-finite reading means the
    /// device does not report pressure and is drawn at full width.
    pub fn thickness(&self, pressure: f32) -> f64 {
        let pressure = if pressure.is_finite() && pressure > 0.0 {
            f64::from(pressure.min(1.0))
        } else {
            1.0
        };
        self.width * (MIN_PRESSURE_FACTOR + (1.0 - MIN_PRESSURE_FACTOR) * pressure)
    }
}

impl Default for InkStyle {
    /// Red 5pt pen
    fn default() -> Self {
        Self { color: Color::RED, width: 5.0 }
    }
}

/// A single freehand stroke
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    id: StrokeId,
    style: InkStyle,
    samples: Vec<StrokeSample>,
    bounds: BoundingBox,
    finalized: bool,
}

/// Serialized form of a finalized stroke
#[derive(Serialize, Deserialize)]
struct StrokeRecord {
    id: StrokeId,
    style: InkStyle,
    samples: Vec<StrokeSample>,
}

impl Stroke {
    /// Open a new stroke with its first sample
    pub fn begin(style: InkStyle, first: StrokeSample) -> Self {
        Self::begin_with_id(StrokeId::new_v4(), style, first)
    }

    /// Open a stroke with a known identifier
    pub fn begin_with_id(id: StrokeId, style: InkStyle, first: StrokeSample) -> Self {
        Self {
            id,
            style,
            samples: vec![first],
            bounds: BoundingBox::around(first.point()),
            finalized: false,
        }
    }

    pub fn id(&self) -> StrokeId {
        self.id
    }

    pub fn style(&self) -> &InkStyle {
        &self.style
    }

    pub fn samples(&self) -> &[StrokeSample] {
        &self.samples
    }

    pub fn last_sample(&self) -> Option<&StrokeSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Strokes always hold at least their first sample
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// A stroke that never moved renders as a dot
    pub fn is_dot(&self) -> bool {
        self.samples.len() == 1
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Bounding box of the sample positions (ink width not included)
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    /// Bounding box grown by half the widest line drawn
    pub fn ink_bounds(&self) -> BoundingBox {
        let widest = self
            .samples
            .iter()
            .map(|s| self.style.thickness(s.pressure))
            .fold(0.0_f64, f64::max);
        self.bounds.inflate(widest / 2.0)
    }

    /// Append a sample to an open stroke
    pub fn push(&mut self, sample: StrokeSample) -> MarkupResult<()> {
        if self.finalized {
            return Err(MarkupError::invalid_state(format!(
                "stroke {} is finalized and cannot be extended",
                self.id
            )));
        }
        self.bounds.include(sample.point());
        self.samples.push(sample);
        Ok(())
    }

    /// Close the stroke; idempotent
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Consuming variant of [`Stroke::finalize`]
    pub fn finalized(mut self) -> Self {
        self.finalize();
        self
    }

    /// Consecutive sample pairs, in drawing order
    pub fn segments(&self) -> impl Iterator<Item = (&StrokeSample, &StrokeSample)> {
        self.samples.windows(2).map(|pair| (&pair[0], &pair[1]))
    }

    /// Encode a stroke for storage alongside its persisted appearance
    pub fn to_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&StrokeRecord {
            id: self.id,
            style: self.style,
            samples: self.samples.clone(),
        })
    }

    /// Decode a stored stroke. The result is always finalized.
    pub fn from_record(record: &str) -> MarkupResult<Self> {
        let record: StrokeRecord = serde_json::from_str(record)
            .map_err(|e| MarkupError::invalid_state(format!("malformed stroke record: {e}")))?;

        let mut samples = record.samples.into_iter();
        let first = samples
            .next()
            .ok_or_else(|| MarkupError::invalid_state("stroke record has no samples"))?;

        let mut stroke = Stroke::begin_with_id(record.id, record.style, first);
        for sample in samples {
            stroke.push(sample)?;
        }
        Ok(stroke.finalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f64, y: f64) -> StrokeSample {
        StrokeSample { x, y, pressure: 1.0, timestamp: 0 }
    }

    #[test]
    fn bounds_follow_appends() {
        let mut stroke = Stroke::begin(InkStyle::default(), sample(10.0, 10.0));
        stroke.push(sample(50.0, 30.0)).unwrap();
        stroke.push(sample(20.0, 50.0)).unwrap();

        let bbox = stroke.bounding_box();
        assert_eq!((bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y), (10.0, 10.0, 50.0, 50.0));
        assert_eq!(stroke.segments().count(), 2);
    }

    #[test]
    fn finalized_stroke_rejects_appends() {
        let mut stroke = Stroke::begin(InkStyle::default(), sample(0.0, 0.0)).finalized();
        let before = stroke.clone();

        let err = stroke.push(sample(5.0, 5.0)).unwrap_err();
        assert!(matches!(err, MarkupError::InvalidState(_)));
        assert_eq!(stroke, before);
    }

    #[test]
    fn single_sample_is_a_dot() {
        let stroke = Stroke::begin(InkStyle::default(), sample(3.0, 4.0));
        assert!(stroke.is_dot());
        assert_eq!(stroke.bounding_box().width(), 0.0);
        assert_eq!(stroke.ink_bounds().width(), 5.0);
    }

    #[test]
    fn thickness_scales_with_pressure() {
        let style = InkStyle::new(Color::BLACK, 4.0);
        assert_eq!(style.thickness(1.0), 4.0);
        assert_eq!(style.thickness(0.0), 4.0);
        assert_eq!(style.thickness(f32::NAN), 4.0);
        assert!((style.thickness(0.5) - 2.5).abs() < 1e-9);
        assert_eq!(style.thickness(3.0), 4.0);
    }

    #[test]
    fn record_preserves_identity_and_samples() {
        let mut stroke = Stroke::begin(InkStyle::default(), sample(1.0, 2.0));
        stroke.push(StrokeSample { x: 3.0, y: 4.0, pressure: 0.5, timestamp: 16 }).unwrap();
        let stroke = stroke.finalized();

        let restored = Stroke::from_record(&stroke.to_record().unwrap()).unwrap();
        assert_eq!(restored, stroke);
        assert!(restored.is_finalized());
    }

    #[test]
    fn empty_record_is_rejected() {
        let record = format!(
            r#"{{"id":"{}","style":{{"color":{{"r":0,"g":0,"b":0,"a":255}},"width":1.0}},"samples":[]}}"#,
            StrokeId::new_v4()
        );
        assert!(Stroke::from_record(&record).is_err());
        assert!(Stroke::from_record("not json").is_err());
    }
}
