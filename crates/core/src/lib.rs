//! PDF Markup Core Library
//!
//! Stroke model, geometry and coordinate transforms for the ink overlay
//! engine. Nothing in this crate owns threads or I/O.

pub mod error;
pub mod geometry;
pub mod stroke;
pub mod transform;

pub use error::{MarkupError, MarkupResult, RejectReason};
pub use geometry::{BoundingBox, PageId, PagePoint, Rect, Rotation, ScreenPoint};
pub use stroke::{Color, InkStyle, Stroke, StrokeId, StrokeSample};
pub use transform::{to_page_space, to_screen_space, CoordinateFrame, RasterFrame};
