//! PDF Markup Render Library
//!
//! Stroke rasterization and the layered per-page annotation compositor.

pub mod compositor;
pub mod raster;

pub use compositor::{
    AnnotationCompositor, CompositeMode, CompositorConfig, LayerCache, LayerJob, SurfaceView,
};
pub use raster::{blank_raster, coverage_bounds, coverage_bounds_in_page, draw_stroke, rasterize_stamp};
