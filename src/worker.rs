//! Background image generation.
//!
//! A [`GenerationWorker`] owns one named thread (`image-generator`) that walks
//! a [`GenerationJob`]'s product ids in order. For each id it draws a
//! synthetic image, offers it to whatever stack the [`StorageSlot`] currently
//! holds and, once the payload is stored, maps `(product, variant)` to the new
//! image id. A record the storage refuses is never mapped.
//!
//! ## Stopping
//!
//! Cancellation is cooperative: [`request_stop`](GenerationWorker::request_stop)
//! raises a flag the thread checks between images, so the image in flight is
//! always stored and registered before the thread exits. Callers block on
//! [`wait_until_stopped`](GenerationWorker::wait_until_stopped), which waits on
//! a condition variable the thread signals on exit (including exit by panic).
//!
//! ## Progress
//!
//! With a `Sender<GenerationEvent>` the worker reports each image as it goes;
//! the CLI prints these from its own thread. The channel closes when the
//! worker finishes, so a `for event in rx` loop ends on its own.

use crate::ids::ImageIdFactory;
use crate::imaging::{ImageSynthesizer, ImagingError, ShapeCount, SynthesisParams};
use crate::index::{ImageIndex, IndexError};
use crate::storage::{StorageError, StorageSlot};
use crate::types::{ImageFormatTag, ImageId, ImageRecord, SizeVariant};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const THREAD_NAME: &str = "image-generator";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// What one generation run should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    /// Products to draw images for, in order.
    pub product_ids: Vec<u64>,
    pub variant: SizeVariant,
    pub shapes: ShapeCount,
    /// Seeds the per-image seeds, so a run is reproducible.
    pub seed: u64,
    /// Stop after this many products even if more are listed.
    pub target_count: usize,
}

impl GenerationJob {
    /// Number of images the run will attempt.
    pub fn planned(&self) -> usize {
        self.product_ids.len().min(self.target_count)
    }
}

/// Shared handles the worker writes through.
#[derive(Clone)]
pub struct WorkerContext {
    pub index: Arc<ImageIndex>,
    pub slot: Arc<StorageSlot>,
    pub ids: Arc<ImageIdFactory>,
    pub synthesizer: Arc<dyn ImageSynthesizer>,
}

/// Progress reported by a running worker.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Started {
        planned: usize,
        variant: SizeVariant,
    },
    ImageStored {
        /// 1-based position within the run.
        position: usize,
        product_id: u64,
        image_id: ImageId,
        bytes: usize,
        elapsed: Duration,
    },
    ImageRejected {
        position: usize,
        product_id: u64,
        image_id: ImageId,
    },
    ImageFailed {
        position: usize,
        product_id: u64,
        error: String,
    },
    Finished {
        stats: GenerationStats,
        stopped: bool,
    },
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub generated: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Summed duration of stored images.
    pub total_time: Duration,
}

impl GenerationStats {
    /// Running average over stored images, zero before the first one.
    pub fn average(&self) -> Duration {
        match u32::try_from(self.generated) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_time / n,
        }
    }
}

struct Shared {
    stop: AtomicBool,
    running: Mutex<bool>,
    exited: Condvar,
    stats: Mutex<GenerationStats>,
}

impl Shared {
    fn stats(&self) -> std::sync::MutexGuard<'_, GenerationStats> {
        self.stats.lock().expect("generation stats lock poisoned")
    }
}

/// Marks the worker stopped when dropped, so waiters wake even if the thread
/// unwinds.
struct ExitSignal(Arc<Shared>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let mut running = match self.0.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *running = false;
        self.0.exited.notify_all();
    }
}

/// Handle on one generation run.
pub struct GenerationWorker {
    shared: Arc<Shared>,
    planned: usize,
    variant: SizeVariant,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationWorker {
    /// Spawn the worker thread for `job`.
    pub fn start(
        job: GenerationJob,
        ctx: WorkerContext,
        events: Option<Sender<GenerationEvent>>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            running: Mutex::new(true),
            exited: Condvar::new(),
            stats: Mutex::new(GenerationStats::default()),
        });
        let planned = job.planned();
        let variant = job.variant;

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let _exit = ExitSignal(Arc::clone(&thread_shared));
                run(&job, &ctx, &thread_shared, events.as_ref());
            });

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                // Nothing will ever signal; leave the handle reporting stopped.
                *shared.running.lock().expect("worker state lock poisoned") = false;
                return Err(e);
            }
        };

        tracing::info!(planned, %variant, "generation worker started");
        Ok(Self {
            shared,
            planned,
            variant,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Ask the thread to exit after the image in flight.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.lock().expect("worker state lock poisoned")
    }

    /// Block until the thread exits, or until `timeout` passes. Returns
    /// whether the worker has stopped.
    pub fn wait_until_stopped(&self, timeout: Option<Duration>) -> bool {
        let running = self.shared.running.lock().expect("worker state lock poisoned");
        let running = match timeout {
            None => self
                .shared
                .exited
                .wait_while(running, |running| *running)
                .expect("worker state lock poisoned"),
            Some(timeout) => {
                self.shared
                    .exited
                    .wait_timeout_while(running, timeout, |running| *running)
                    .expect("worker state lock poisoned")
                    .0
            }
        };
        !*running
    }

    /// Join the thread once it has stopped. A panic on the worker thread is
    /// logged, not propagated.
    pub fn join(&self) {
        let handle = self.handle.lock().expect("worker handle lock poisoned").take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!("generation worker panicked");
        }
    }

    /// Number of images this run attempts.
    pub fn planned(&self) -> usize {
        self.planned
    }

    pub fn variant(&self) -> SizeVariant {
        self.variant
    }

    pub fn stats(&self) -> GenerationStats {
        *self.shared.stats()
    }

    pub fn generated_count(&self) -> usize {
        self.shared.stats().generated
    }

    pub fn failed_count(&self) -> usize {
        self.shared.stats().failed
    }

    pub fn rejected_count(&self) -> usize {
        self.shared.stats().rejected
    }

    /// Running average of the time taken per stored image.
    pub fn average_generation_time(&self) -> Duration {
        self.shared.stats().average()
    }
}

enum Outcome {
    Stored { bytes: usize },
    Rejected,
}

fn emit(events: Option<&Sender<GenerationEvent>>, event: GenerationEvent) {
    if let Some(tx) = events {
        // The receiver going away only silences progress output.
        tx.send(event).ok();
    }
}

fn run(job: &GenerationJob, ctx: &WorkerContext, shared: &Shared, events: Option<&Sender<GenerationEvent>>) {
    let mut rng = fastrand::Rng::with_seed(job.seed);
    let mut stopped = false;

    emit(
        events,
        GenerationEvent::Started {
            planned: job.planned(),
            variant: job.variant,
        },
    );

    for (i, &product_id) in job.product_ids.iter().take(job.target_count).enumerate() {
        if shared.stop.load(Ordering::Acquire) {
            stopped = true;
            break;
        }
        let position = i + 1;
        let started = Instant::now();
        let image_id = ctx.ids.next_id();
        let params = SynthesisParams::for_variant(job.variant, job.shapes, rng.u64(..));

        match generate_one(ctx, product_id, image_id, job.variant, &params) {
            Ok(Outcome::Stored { bytes }) => {
                let elapsed = started.elapsed();
                {
                    let mut stats = shared.stats();
                    stats.generated += 1;
                    stats.total_time += elapsed;
                }
                tracing::debug!(product_id, image_id, bytes, ?elapsed, "image stored");
                emit(
                    events,
                    GenerationEvent::ImageStored {
                        position,
                        product_id,
                        image_id,
                        bytes,
                        elapsed,
                    },
                );
            }
            Ok(Outcome::Rejected) => {
                shared.stats().rejected += 1;
                tracing::debug!(product_id, image_id, "image refused by storage rule");
                emit(
                    events,
                    GenerationEvent::ImageRejected {
                        position,
                        product_id,
                        image_id,
                    },
                );
            }
            Err(e) => {
                shared.stats().failed += 1;
                tracing::warn!(product_id, image_id, error = %e, "image generation failed");
                emit(
                    events,
                    GenerationEvent::ImageFailed {
                        position,
                        product_id,
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    let stats = *shared.stats();
    tracing::info!(
        generated = stats.generated,
        rejected = stats.rejected,
        failed = stats.failed,
        stopped,
        "generation worker finished"
    );
    emit(events, GenerationEvent::Finished { stats, stopped });
}

fn generate_one(
    ctx: &WorkerContext,
    product_id: u64,
    image_id: ImageId,
    variant: SizeVariant,
    params: &SynthesisParams,
) -> Result<Outcome, GenerationError> {
    let bytes = ctx.synthesizer.synthesize(params)?;
    let record = Arc::new(ImageRecord::new(image_id, variant, bytes, ImageFormatTag::STORE));
    let size = record.len();

    if !ctx.slot.put(record)? {
        return Ok(Outcome::Rejected);
    }
    ctx.index.set_mapping(product_id, image_id, variant)?;
    Ok(Outcome::Stored { bytes: size })
}
