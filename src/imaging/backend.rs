//! Image synthesis backend trait and shared types.
//!
//! The [`ImageSynthesizer`] trait defines the two operations the image stack
//! needs from pixel code: draw a new synthetic image, and re-encode an
//! existing asset file into the store format.
//!
//! The production implementation is
//! [`ShapeSynthesizer`](super::shapes::ShapeSynthesizer). Tests swap in a
//! recording mock that can be told to fail or to take its time.

use super::params::SynthesisParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Trait for image synthesis backends.
///
/// Implementations are shared with the generation worker thread, hence
/// `Send + Sync`.
pub trait ImageSynthesizer: Send + Sync {
    /// Draw a synthetic image and return it encoded in the store format.
    fn synthesize(&self, params: &SynthesisParams) -> Result<Vec<u8>, ImagingError>;

    /// Decode the image at `path` and return it re-encoded in the store
    /// format.
    fn reencode(&self, path: &Path) -> Result<Vec<u8>, ImagingError>;
}
