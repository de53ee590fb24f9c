//! Parameter types for image synthesis.
//!
//! These structs describe *what* to draw, not *how*. The generation worker
//! builds them; the [`backend`](super::backend) turns them into pixels. A
//! mock backend can therefore stand in for the real one in worker tests.

use crate::types::SizeVariant;

/// Number of shapes drawn per synthetic image (1-200).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeCount(u32);

impl ShapeCount {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 200))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for ShapeCount {
    fn default() -> Self {
        Self(15)
    }
}

/// Everything needed to draw one synthetic image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisParams {
    pub width: u32,
    pub height: u32,
    pub shapes: ShapeCount,
    /// Seed for this image alone. Equal params produce equal pixels.
    pub seed: u64,
}

impl SynthesisParams {
    pub fn for_variant(variant: SizeVariant, shapes: ShapeCount, seed: u64) -> Self {
        let (width, height) = variant.dimensions();
        Self {
            width,
            height,
            shapes,
            seed,
        }
    }
}
