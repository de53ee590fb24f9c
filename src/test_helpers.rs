//! Shared test utilities for the storefront-images test suite.
//!
//! Provides record builders, PNG fixtures, and a [`Harness`] bundling the
//! shared handles (index, id factory, working directory, storage slot) that
//! the worker and setup tests wire together.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let harness = Harness::new();
//! let worker = harness.start_worker(job(&[1, 2, 3], 3), MockSynthesizer::new());
//! assert!(worker.wait_until_stopped(Some(WAIT)));
//! assert_eq!(harness.dir.list_ids().unwrap().len(), 3);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::ids::ImageIdFactory;
use crate::imaging::ShapeCount;
use crate::imaging::backend::tests::MockSynthesizer;
use crate::index::ImageIndex;
use crate::rules::StorageRule;
use crate::storage::{DriveStorage, StorageSlot, WorkingDir};
use crate::types::{ImageFormatTag, ImageId, ImageRecord, SizeVariant};
use crate::worker::{GenerationJob, GenerationWorker, WorkerContext};

/// Upper bound for any test that waits on the worker thread.
pub const WAIT: Duration = Duration::from_secs(10);

// =========================================================================
// Records and fixtures
// =========================================================================

/// A record whose payload names its id and variant.
pub fn record(id: ImageId, variant: SizeVariant) -> ImageRecord {
    ImageRecord::new(
        id,
        variant,
        format!("image-{id}-{variant}").into_bytes(),
        ImageFormatTag::STORE,
    )
}

/// Encode a solid-colour PNG.
pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Write `<label>.png` into `dir`.
pub fn write_asset(dir: &Path, label: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(format!("{label}.png")), png_bytes(8, 8, [10, 120, 200])).unwrap();
}

/// A job over `product_ids` at the full variant.
pub fn job(product_ids: &[u64], target_count: usize) -> GenerationJob {
    GenerationJob {
        product_ids: product_ids.to_vec(),
        variant: SizeVariant::Full,
        shapes: ShapeCount::new(3),
        seed: 5,
        target_count,
    }
}

// =========================================================================
// Wired handles
// =========================================================================

/// Temp working directory plus the shared handles a worker writes through.
/// The slot starts out as unlimited drive storage admitting everything.
pub struct Harness {
    pub tmp: TempDir,
    pub dir: WorkingDir,
    pub index: Arc<ImageIndex>,
    pub ids: Arc<ImageIdFactory>,
    pub slot: Arc<StorageSlot>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rule(StorageRule::All)
    }

    pub fn with_rule(rule: StorageRule) -> Self {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        let index = Arc::new(ImageIndex::new());
        let slot = Arc::new(StorageSlot::new(Arc::new(DriveStorage::new(
            dir.clone(),
            Arc::clone(&index),
            rule,
        ))));
        Self {
            tmp,
            dir,
            index,
            ids: Arc::new(ImageIdFactory::new()),
            slot,
        }
    }

    pub fn context(&self, synthesizer: MockSynthesizer) -> WorkerContext {
        WorkerContext {
            index: Arc::clone(&self.index),
            slot: Arc::clone(&self.slot),
            ids: Arc::clone(&self.ids),
            synthesizer: Arc::new(synthesizer),
        }
    }

    pub fn start_worker(&self, job: GenerationJob, synthesizer: MockSynthesizer) -> GenerationWorker {
        GenerationWorker::start(job, self.context(synthesizer), None).unwrap()
    }
}
