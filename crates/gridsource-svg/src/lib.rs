//! SVG markup replay onto 2D canvases
//!
//! Grid exports render their SVG snapshot through this crate. The document is parsed with
//! `roxmltree` and replayed as canvas calls, so any `Canvas2d` backend can rasterize it.
//!
//! Modules:
//! * `canvas`: The `Canvas2d` trait, paint types and the `RecordingCanvas`.
//! * `matrix`: Affine transforms.
//! * `path`: Path data parsing and arc conversion.
//! * `style`: Colors, transform lists and inherited presentation attributes.
//! * `render`: Document traversal and element drawing.

pub mod canvas;
pub mod error;
pub mod matrix;
pub mod path;
pub mod render;
pub mod style;

pub use canvas::{
    Canvas2d, Color, DrawCommand, FillStyle, Font, LineCap, LineJoin, Paint, Pattern,
    RecordingCanvas, Shadow, StrokeStyle, TextAlign, TextStyle, replay,
};
pub use error::{Result, SvgError};
pub use matrix::Matrix;
pub use render::{RenderOptions, record_svg, render_svg};
