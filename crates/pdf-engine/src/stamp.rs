//! Stamp annotation encoding for committed strokes
//!
//! A stroke is persisted as a `/Stamp` annotation whose normal appearance is
//! the stroke raster (RGB image plus a DeviceGray soft mask). The stroke
//! record rides along under a private key so a reload gets the exact samples
//! back instead of having to trace the bitmap.

use crate::{PdfEngineError, PdfEngineResult};
use image::RgbaImage;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use pdf_markup_core::{BoundingBox, Stroke, StrokeId};

/// Private annotation key holding the JSON stroke record
pub const STROKE_RECORD_KEY: &[u8] = b"PdfMarkupInk";

const APPEARANCE_IMAGE_NAME: &str = "Ink0";

/// Rendered form of a stroke, ready to append to a page
#[derive(Debug, Clone)]
pub struct AnnotationContent {
    pub stroke_id: StrokeId,
    /// Page-space region the image covers; becomes the annotation `/Rect`
    pub region: BoundingBox,
    pub image: RgbaImage,
    pub record: String,
}

impl AnnotationContent {
    /// Rasterize a finalized stroke at `scale` pixels per point
    pub fn from_stroke(stroke: &Stroke, scale: f64) -> PdfEngineResult<Self> {
        if !stroke.is_finalized() {
            return Err(PdfEngineError::InvalidContent(format!(
                "stroke {} is still open",
                stroke.id()
            )));
        }

        let (image, region) = pdf_markup_render::rasterize_stamp(stroke, scale)
            .map_err(|e| PdfEngineError::InvalidContent(e.to_string()))?;
        let record = stroke.to_record()?;

        Ok(Self { stroke_id: stroke.id(), region, image, record })
    }
}

/// Add the image, its soft mask, the appearance form and the annotation
/// dictionary to `doc`, returning the annotation's object id.
///
/// Image data is Flate-compressed.
pub(crate) fn add_stamp(
    doc: &mut Document,
    page_id: ObjectId,
    content: &AnnotationContent,
) -> PdfEngineResult<ObjectId> {
    let (width_px, height_px) = content.image.dimensions();
    let mut rgb = Vec::with_capacity((width_px * height_px * 3) as usize);
    let mut alpha = Vec::with_capacity((width_px * height_px) as usize);
    for pixel in content.image.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel[3]);
    }

    let smask_id = doc.add_object(compressed(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width_px),
            "Height" => i64::from(height_px),
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        alpha,
    )?);

    let image_id = doc.add_object(compressed(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width_px),
            "Height" => i64::from(height_px),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "SMask" => smask_id,
        },
        rgb,
    )?);

    let region = content.region;
    let (width_pt, height_pt) = (region.width(), region.height());
    let draw = format!("q {width_pt} 0 0 {height_pt} 0 0 cm /{APPEARANCE_IMAGE_NAME} Do Q");
    let appearance_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![real(0.0), real(0.0), real(width_pt), real(height_pt)],
            "Resources" => dictionary! {
                "XObject" => dictionary! { APPEARANCE_IMAGE_NAME => image_id },
            },
        },
        draw.into_bytes(),
    ));

    let mut annot = dictionary! {
        "Type" => "Annot",
        "Subtype" => "Stamp",
        "Rect" => vec![
            real(region.min_x),
            real(region.min_y),
            real(region.max_x),
            real(region.max_y),
        ],
        "P" => page_id,
        // Print flag
        "F" => 4,
        "AP" => dictionary! { "N" => appearance_id },
    };
    annot.set(
        "NM",
        Object::String(content.stroke_id.to_string().into_bytes(), StringFormat::Literal),
    );
    annot.set(
        STROKE_RECORD_KEY,
        Object::String(content.record.clone().into_bytes(), StringFormat::Literal),
    );

    Ok(doc.add_object(Object::Dictionary(annot)))
}

fn compressed(dict: Dictionary, content: Vec<u8>) -> PdfEngineResult<Stream> {
    let mut stream = Stream::new(dict, content);
    stream.compress()?;
    Ok(stream)
}

/// Decode the stroke stored on one annotation, if it is one of ours
pub(crate) fn decode_stamp(annot: &Dictionary) -> Option<PdfEngineResult<Stroke>> {
    let is_stamp = annot.get(b"Subtype").and_then(Object::as_name).is_ok_and(|name| name == b"Stamp");
    if !is_stamp {
        return None;
    }
    let record = match annot.get(STROKE_RECORD_KEY) {
        Ok(Object::String(bytes, _)) => bytes,
        _ => return None,
    };

    Some(
        std::str::from_utf8(record)
            .map_err(|e| PdfEngineError::InvalidContent(format!("stroke record is not UTF-8: {e}")))
            .and_then(|text| {
                Stroke::from_record(text).map_err(|e| PdfEngineError::InvalidContent(e.to_string()))
            }),
    )
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}
