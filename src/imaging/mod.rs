//! Image synthesis in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Synthesize** | random shapes on an `RgbImage`, seeded by `fastrand` |
//! | **Re-encode asset** | `ImageReader` decode → PNG |
//! | **Store format** | PNG via `DynamicImage::write_to` |
//!
//! The module is split into:
//! - **Parameters**: Data structures describing one image to draw
//! - **Backend**: [`ImageSynthesizer`] trait + [`ImagingError`]
//! - **Shapes**: [`ShapeSynthesizer`], the production backend

pub mod backend;
mod params;
pub mod shapes;

pub use backend::{ImageSynthesizer, ImagingError};
pub use params::{ShapeCount, SynthesisParams};
pub use shapes::ShapeSynthesizer;
