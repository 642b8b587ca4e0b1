#![allow(dead_code)]

use lopdf::{dictionary, Document, Object};
use pdf_markup_overlay::{
    Color, ContinuousLayout, DocumentModel, InkStyle, InputEvent, InputPhase, MarkupConfig,
    MarkupEngine, MarkupResult, PageGeometry, PageLayout, PersistenceMode, PointId, PointerKind,
    Rect, Rotation, ScreenPoint,
};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// `count` 100x100 pages at zoom 1 in a 200x400 viewport.
///
/// Page 0 sits at screen (50, 20), page 1 at (50, 140), and so on; a screen
/// point `(sx, sy)` on page 0 maps to page point `(sx - 50, 120 - sy)`.
pub fn square_pages(count: usize) -> ContinuousLayout {
    let page = PageGeometry::new(Rect::from_size(100.0, 100.0), Rotation::Deg0);
    ContinuousLayout::new(vec![page; count], 200.0, 400.0)
}

/// Deterministic engine settings with a thin black pen
pub fn inline_config() -> MarkupConfig {
    MarkupConfig::default()
        .with_persistence_mode(PersistenceMode::Inline)
        .with_ink(InkStyle::new(Color::BLACK, 1.0))
}

pub fn touch(point_id: PointId, phase: InputPhase, x: f64, y: f64) -> InputEvent {
    InputEvent::new(point_id, PointerKind::Touch, phase, ScreenPoint::new(x, y))
}

/// Feed one complete gesture through the first to the last screen point
pub fn draw<D: DocumentModel, L: PageLayout>(
    engine: &mut MarkupEngine<D, L>,
    point_id: PointId,
    points: &[(f64, f64)],
) -> MarkupResult<()> {
    let (first, rest) = points.split_first().expect("a gesture needs at least one point");
    engine.handle_input(&touch(point_id, InputPhase::Began, first.0, first.1))?;
    for &(x, y) in rest {
        engine.handle_input(&touch(point_id, InputPhase::Moved, x, y))?;
    }
    let last = points.last().unwrap_or(first);
    engine.handle_input(&touch(point_id, InputPhase::Ended, last.0, last.1))
}

/// Minimal PDF whose pages all inherit a 100x100 media box
pub fn square_pdf_bytes(count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..count)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("sample pdf should serialize");
    bytes
}
