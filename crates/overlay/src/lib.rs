//! PDF Markup Overlay
//!
//! Turns pointer input into page-space ink strokes, keeps a per-page overlay
//! for every page in the visible window, composites the strokes into a raster
//! for the view layer, and persists committed strokes as PDF annotations.
//!
//! [`MarkupEngine`] ties the pieces together; the individual components are
//! public for hosts that want to drive them directly.

pub mod config;
pub mod engine;
pub mod gesture;
pub mod input;
pub mod layout;
pub mod overlay;
pub mod persistence;

pub use config::{ConfigError, InputPolicy, MarkupConfig, PointerFilter};
pub use engine::MarkupEngine;
pub use gesture::{GesturePhase, GestureTracker, StrokeEvent};
pub use input::{InputEvent, InputPhase, PointId, PointerKind};
pub use layout::{ContinuousLayout, PageGeometry, PageLayout, VisibilityChange};
pub use overlay::{AnnotationSummary, PageOverlay, PageOverlayStore};
pub use persistence::{PersistenceBridge, PersistenceEvent, PersistenceMode};

pub use pdf_engine::{DocumentModel, LopdfDocument, OpenSource, PdfEngineError};
pub use pdf_markup_core::{
    Color, InkStyle, MarkupError, MarkupResult, PageId, PagePoint, Rect, RejectReason, Rotation,
    ScreenPoint, Stroke, StrokeId,
};
pub use pdf_markup_render::CompositeMode;
