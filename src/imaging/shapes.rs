//! Pure Rust shape synthesizer.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Random source | `fastrand::Rng::with_seed` (one per image) |
//! | Canvas | `image::RgbImage` |
//! | Decode assets (PNG, JPEG) | `image::ImageReader` with guessed format |
//! | Encode → PNG | `image::DynamicImage::write_to` |
//!
//! Shapes are filled rectangles, filled circles and one-pixel lines in random
//! colours on a random background.

use super::backend::{ImageSynthesizer, ImagingError};
use super::params::SynthesisParams;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Production synthesizer backed by the `image` crate.
pub struct ShapeSynthesizer;

impl ShapeSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShapeSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

fn random_colour(rng: &mut fastrand::Rng) -> Rgb<u8> {
    Rgb([rng.u8(..), rng.u8(..), rng.u8(..)])
}

fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, colour: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    for y in y0.min(y1)..y0.max(y1).min(h) {
        for x in x0.min(x1)..x0.max(x1).min(w) {
            canvas.put_pixel(x, y, colour);
        }
    }
}

fn fill_circle(canvas: &mut RgbImage, cx: i64, cy: i64, radius: i64, colour: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    let r2 = radius * radius;
    for y in (cy - radius).max(0)..(cy + radius + 1).min(i64::from(h)) {
        for x in (cx - radius).max(0)..(cx + radius + 1).min(i64::from(w)) {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r2 {
                canvas.put_pixel(x as u32, y as u32, colour);
            }
        }
    }
}

fn draw_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), colour: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).max(1);
    for step in 0..=steps {
        let x = from.0 + (to.0 - from.0) * step / steps;
        let y = from.1 + (to.1 - from.1) * step / steps;
        if (0..i64::from(w)).contains(&x) && (0..i64::from(h)).contains(&y) {
            canvas.put_pixel(x as u32, y as u32, colour);
        }
    }
}

/// Draw the shapes described by `params` onto a fresh canvas.
pub fn draw(params: &SynthesisParams) -> RgbImage {
    let mut rng = fastrand::Rng::with_seed(params.seed);
    let (w, h) = (params.width.max(1), params.height.max(1));
    let mut canvas = RgbImage::from_pixel(w, h, random_colour(&mut rng));

    for _ in 0..params.shapes.value() {
        let colour = random_colour(&mut rng);
        match rng.u8(0..3) {
            0 => {
                let (x0, x1) = (rng.u32(0..w), rng.u32(0..w));
                let (y0, y1) = (rng.u32(0..h), rng.u32(0..h));
                fill_rect(&mut canvas, x0, y0, x1, y1, colour);
            }
            1 => {
                let radius = i64::from(rng.u32(1..=(w.min(h) / 4).max(1)));
                let (cx, cy) = (i64::from(rng.u32(0..w)), i64::from(rng.u32(0..h)));
                fill_circle(&mut canvas, cx, cy, radius, colour);
            }
            _ => {
                let from = (i64::from(rng.u32(0..w)), i64::from(rng.u32(0..h)));
                let to = (i64::from(rng.u32(0..w)), i64::from(rng.u32(0..h)));
                draw_line(&mut canvas, from, to, colour);
            }
        }
    }
    canvas
}

fn encode_png(img: DynamicImage) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ImagingError::Encode(format!("PNG encode failed: {e}")))?;
    Ok(buf.into_inner())
}

impl ImageSynthesizer for ShapeSynthesizer {
    fn synthesize(&self, params: &SynthesisParams) -> Result<Vec<u8>, ImagingError> {
        encode_png(DynamicImage::ImageRgb8(draw(params)))
    }

    fn reencode(&self, path: &Path) -> Result<Vec<u8>, ImagingError> {
        let decoded = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| ImagingError::Decode {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        encode_png(decoded)
    }
}
