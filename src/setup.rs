//! Wiring and lifecycle of the image stack.
//!
//! [`SetupController`] is created once by the entry point and owns every
//! long-lived piece: configuration, the live [`ImageIndex`], the shared
//! [`ImageIdFactory`], the current [`GenerationWorker`] and the
//! [`StorageSlot`] that worker writes through.
//!
//! ## Lifecycle
//!
//! ```text
//! new / from_config
//!   → detect_pre_existing_images   (assets → web mappings, pre-warm list)
//!   → generate_images[_from_source] (starts the worker)
//!   → finalize_setup               (builds storage + cache, hands it to the provider)
//!   → reconfiguration …            (any number of times)
//! ```
//!
//! Until the first `finalize_setup` the worker writes through an unlimited
//! drive storage, so images generated early are never lost; finalizing swaps
//! the configured stack into the slot and the worker picks it up on its next
//! image.
//!
//! ## Reconfiguration
//!
//! Stops the worker, fetches the current catalogue and keeps the image of
//! every product that already has one at the largest variant, under its
//! original id. Web images survive whatever their variant. Every other file
//! in the working directory is deleted, the products without an image get a
//! fresh generation run, and the stack is rebuilt. Nothing is touched if the
//! worker fails to stop in time or the catalogue is unavailable.
//!
//! ## Storage ceiling
//!
//! Limited drive storage is bounded by `images_to_generate +
//! images_pre_existing + images_retained`, where the last term counts the
//! product images the most recent reconfiguration kept. Without it a limited
//! stack rebuilt after reconfiguration would trim kept images.

use crate::cache::{CacheLayer, CacheMode};
use crate::config::{ConfigError, ServiceConfig};
use crate::ids::ImageIdFactory;
use crate::imaging::{ImageSynthesizer, ShapeCount};
use crate::index::{ImageIndex, IndexError};
use crate::provider::{ImageProvider, ProductSource};
use crate::rules::{CacheRule, StorageRule};
use crate::storage::{
    DriveStorage, StorageBackend, StorageError, StorageMode, StorageSlot, WorkingDir, build_storage,
};
use crate::types::{ImageFormatTag, ImageRecord, SizeVariant, SubjectKey};
use crate::worker::{GenerationEvent, GenerationJob, GenerationWorker, WorkerContext};
use rayon::prelude::*;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("a generation worker is already running")]
    WorkerBusy,
    #[error("generation worker did not stop within {0:?}")]
    WorkerStuck(Duration),
}

/// Outcome of one [`SetupController::reconfiguration`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconfigurationReport {
    /// Products that kept their existing image.
    pub kept: usize,
    /// Products queued for a fresh image.
    pub new: usize,
    /// Files removed from the working directory.
    pub deleted: usize,
    /// Web images carried over.
    pub web_retained: usize,
}

pub struct SetupController {
    storage_mode: StorageMode,
    storage_rule: StorageRule,
    cache_mode: CacheMode,
    cache_rule: CacheRule,
    cache_size: usize,
    working_dir: WorkingDir,
    variant: SizeVariant,
    shapes: ShapeCount,
    seed: u64,
    stop_timeout: Duration,

    product_ids: Vec<u64>,
    images_to_generate: usize,
    images_pre_existing: usize,
    images_retained: usize,

    index: Arc<ImageIndex>,
    ids: Arc<ImageIdFactory>,
    pre_cache: Vec<Arc<ImageRecord>>,
    worker: Option<Arc<GenerationWorker>>,
    slot: Arc<StorageSlot>,
    stack: Option<Arc<dyn StorageBackend>>,

    products: Arc<dyn ProductSource>,
    provider: Arc<dyn ImageProvider>,
    synthesizer: Arc<dyn ImageSynthesizer>,
    events: Option<Sender<GenerationEvent>>,
}

impl SetupController {
    /// Controller with default policies over `working_dir`, which is
    /// created if missing. Ids continue after the highest id-named file
    /// already in the directory.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        products: Arc<dyn ProductSource>,
        provider: Arc<dyn ImageProvider>,
        synthesizer: Arc<dyn ImageSynthesizer>,
    ) -> Result<Self, SetupError> {
        let working_dir = open_working_dir(working_dir.into())?;
        let first_id = working_dir.list_ids()?.last().map_or(1, |id| id + 1);
        let index = Arc::new(ImageIndex::new());
        let slot = Arc::new(StorageSlot::new(Arc::new(DriveStorage::new(
            working_dir.clone(),
            Arc::clone(&index),
            StorageRule::default(),
        ))));
        let defaults = ServiceConfig::default();

        Ok(Self {
            storage_mode: defaults.storage.mode,
            storage_rule: defaults.storage.rule,
            cache_mode: defaults.cache.mode,
            cache_rule: defaults.cache.rule,
            cache_size: defaults.cache.size,
            working_dir,
            variant: defaults.generation.variant,
            shapes: ShapeCount::new(defaults.generation.shapes_per_image),
            seed: defaults.generation.seed,
            stop_timeout: defaults.reconfiguration.stop_timeout(),
            product_ids: Vec::new(),
            images_to_generate: 0,
            images_pre_existing: 0,
            images_retained: 0,
            index,
            ids: Arc::new(ImageIdFactory::starting_at(first_id)),
            pre_cache: Vec::new(),
            worker: None,
            slot,
            stack: None,
            products,
            provider,
            synthesizer,
            events: None,
        })
    }

    /// Controller configured from a loaded `config.toml`.
    pub fn from_config(
        config: &ServiceConfig,
        products: Arc<dyn ProductSource>,
        provider: Arc<dyn ImageProvider>,
        synthesizer: Arc<dyn ImageSynthesizer>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let mut controller = Self::new(&config.working_dir, products, provider, synthesizer)?;
        controller.storage_mode = config.storage.mode;
        controller.storage_rule = config.storage.rule;
        controller.cache_mode = config.cache.mode;
        controller.cache_rule = config.cache.rule;
        controller.cache_size = config.cache.size;
        controller.variant = config.generation.variant;
        controller.shapes = ShapeCount::new(config.generation.shapes_per_image);
        controller.seed = config.generation.seed;
        controller.stop_timeout = config.reconfiguration.stop_timeout();
        Ok(controller)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn set_storage_mode(&mut self, mode: &str) -> Result<(), ConfigError> {
        self.storage_mode = parse_setting("storage mode", mode)?;
        Ok(())
    }

    pub fn set_storage_rule(&mut self, rule: &str) -> Result<(), ConfigError> {
        self.storage_rule = parse_setting("storage rule", rule)?;
        Ok(())
    }

    pub fn set_cache_mode(&mut self, mode: &str) -> Result<(), ConfigError> {
        self.cache_mode = parse_setting("cache mode", mode)?;
        Ok(())
    }

    pub fn set_cache_rule(&mut self, rule: &str) -> Result<(), ConfigError> {
        self.cache_rule = parse_setting("cache rule", rule)?;
        Ok(())
    }

    pub fn set_cache_size(&mut self, size: usize) -> Result<(), ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache size",
                reason: "must be at least 1".into(),
            });
        }
        self.cache_size = size;
        Ok(())
    }

    /// Move the working directory. Takes effect for ingestion and for the
    /// next `finalize_setup`; a running worker keeps its current stack.
    pub fn set_working_dir(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        self.working_dir = open_working_dir(path.into())?;
        Ok(())
    }

    pub fn set_generation_variant(&mut self, variant: &str) -> Result<(), ConfigError> {
        self.variant = parse_setting("size variant", variant)?;
        Ok(())
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    /// Forward progress of every future generation run to `events`.
    pub fn set_event_sender(&mut self, events: Option<Sender<GenerationEvent>>) {
        self.events = events;
    }

    // =========================================================================
    // Generation and ingestion
    // =========================================================================

    /// Start a generation run for the first `count` of `product_ids`.
    ///
    /// Returns `false` without doing anything for an empty list or a zero
    /// count.
    pub fn generate_images(&mut self, product_ids: Vec<u64>, count: usize) -> Result<bool, SetupError> {
        if product_ids.is_empty() || count == 0 {
            return Ok(false);
        }
        if let Some(worker) = &self.worker {
            if worker.is_running() {
                return Err(SetupError::WorkerBusy);
            }
            worker.join();
        }

        self.product_ids = product_ids;
        self.images_to_generate = count;
        if self.stack.is_none() {
            self.slot.replace(self.bootstrap_stack());
        }

        let job = GenerationJob {
            product_ids: self.product_ids.clone(),
            variant: self.variant,
            shapes: self.shapes,
            seed: self.seed,
            target_count: count,
        };
        let worker = GenerationWorker::start(job, self.worker_context(), self.events.clone())?;
        self.worker = Some(Arc::new(worker));
        Ok(true)
    }

    /// Fetch the catalogue and generate images for it. `None` means every
    /// product. Returns `false` if the product source is unavailable.
    pub fn generate_images_from_source(&mut self, count: Option<usize>) -> Result<bool, SetupError> {
        let Some(product_ids) = self.products.product_ids() else {
            tracing::warn!("product source unavailable, skipping generation");
            return Ok(false);
        };
        let count = count.unwrap_or(product_ids.len());
        self.generate_images(product_ids, count)
    }

    /// Ingest every `<label>.png` in `assets_dir` into the live index. See
    /// [`detect_pre_existing_images_into`](Self::detect_pre_existing_images_into).
    pub fn detect_pre_existing_images(&mut self, assets_dir: &Path) -> Result<usize, SetupError> {
        let index = Arc::clone(&self.index);
        self.detect_pre_existing_images_into(&index, assets_dir)
    }

    /// Ingest every `<label>.png` in `assets_dir` (not recursive, by name).
    /// Labels `index` already maps are skipped, so ingesting twice is a no-op.
    ///
    /// Each file is decoded and re-encoded in parallel, then, in name order,
    /// given a fresh id, written into the working directory and mapped as web
    /// image `label` at the largest variant. The records are kept to pre-warm
    /// the cache. Files that fail to decode are logged and skipped. A
    /// missing directory ingests nothing. Returns the number ingested.
    pub fn detect_pre_existing_images_into(
        &mut self,
        index: &ImageIndex,
        assets_dir: &Path,
    ) -> Result<usize, SetupError> {
        if !assets_dir.is_dir() {
            tracing::info!(dir = %assets_dir.display(), "no assets directory, nothing to ingest");
            return Ok(0);
        }

        let assets: Vec<(String, PathBuf)> = WalkDir::new(assets_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let path = e.into_path();
                let label = asset_label(&path)?;
                Some((label, path))
            })
            .filter(|(label, _)| {
                let mapped = index.has_image(&SubjectKey::from(label.as_str()), SizeVariant::largest());
                if mapped {
                    tracing::debug!(label = %label, "asset already ingested, skipping");
                }
                !mapped
            })
            .collect();

        let synthesizer = Arc::clone(&self.synthesizer);
        let decoded: Vec<_> = assets
            .par_iter()
            .map(|(label, path)| (label, path, synthesizer.reencode(path)))
            .collect();

        let variant = SizeVariant::largest();
        let mut ingested = 0;
        for (label, path, result) in decoded {
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable asset");
                    continue;
                }
            };

            let id = self.ids.next_id();
            let record = Arc::new(ImageRecord::new(id, variant, bytes, ImageFormatTag::STORE));
            if let Err(e) = self.working_dir.write_atomic(id, &record.bytes) {
                tracing::warn!(path = %path.display(), id, error = %e, "could not store asset");
                continue;
            }
            index.set_mapping(label.as_str(), id, variant)?;
            tracing::debug!(label = %label, id, "ingested pre-existing image");

            self.pre_cache.push(record);
            self.images_pre_existing += 1;
            ingested += 1;
        }

        tracing::info!(ingested, dir = %assets_dir.display(), "pre-existing images ingested");
        Ok(ingested)
    }

    // =========================================================================
    // Stack assembly
    // =========================================================================

    /// Build the configured storage (and cache), pre-warm it, swap it into
    /// the worker's slot and hand it to the provider.
    pub fn finalize_setup(&mut self) -> Result<Arc<dyn StorageBackend>, SetupError> {
        let ceiling = self.storage_ceiling();
        // Built under the slot's write lock so a write the worker has in
        // flight lands before the limited storage lists the directory.
        let stack = self.slot.rebuild(|| -> io::Result<Arc<dyn StorageBackend>> {
            let storage = build_storage(
                self.storage_mode,
                self.working_dir.clone(),
                Arc::clone(&self.index),
                self.storage_rule,
                ceiling,
            )?;
            Ok(match self.cache_mode.policy() {
                None => storage,
                Some(policy) => {
                    let cache = CacheLayer::new(
                        storage,
                        Arc::clone(&self.index),
                        policy,
                        self.cache_size,
                        self.cache_rule,
                    );
                    for record in &self.pre_cache {
                        cache.cache_data(Arc::clone(record));
                    }
                    Arc::new(cache)
                }
            })
        })?;

        self.provider.set_image_index(Arc::clone(&self.index));
        self.provider.set_storage(Arc::clone(&stack));
        self.provider.set_generation_worker(self.worker.clone());
        self.stack = Some(Arc::clone(&stack));

        tracing::info!(
            storage = %self.storage_mode,
            rule = %self.storage_rule,
            cache = %self.cache_mode,
            cache_size = self.cache_size,
            ceiling,
            "image stack finalized"
        );
        Ok(stack)
    }

    /// Delete every file in the working directory and the directory itself.
    pub fn delete_all_created_data(&mut self) -> Result<(), SetupError> {
        self.working_dir.delete_all()?;
        tracing::info!(dir = %self.working_dir.path().display(), "deleted all created images");
        Ok(())
    }

    /// Re-sync the image stack with the current catalogue.
    ///
    /// Returns `Ok(None)` if the product source is unavailable; nothing but
    /// the worker's stop has happened then.
    pub fn reconfiguration(&mut self) -> Result<Option<ReconfigurationReport>, SetupError> {
        if let Some(worker) = &self.worker {
            worker.request_stop();
            if !worker.wait_until_stopped(Some(self.stop_timeout)) {
                return Err(SetupError::WorkerStuck(self.stop_timeout));
            }
            worker.join();
        }

        let Some(product_ids) = self.products.product_ids() else {
            tracing::warn!("product source unavailable, reconfiguration skipped");
            return Ok(None);
        };

        let largest = SizeVariant::largest();
        let mut seen = HashSet::new();
        let (known, unknown): (Vec<u64>, Vec<u64>) = product_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .partition(|id| self.index.has_image(&SubjectKey::Product(*id), largest));

        let snapshot = self.index.snapshot();
        self.index.remove_product_mappings();

        let mut retained = HashSet::new();
        for &product_id in &known {
            if let Some(id) = snapshot.image_id(&SubjectKey::Product(product_id), largest) {
                self.index.set_mapping(product_id, id, largest)?;
                retained.insert(id);
            }
        }
        let web_ids = snapshot.all_web_image_ids();
        let web_retained = web_ids.len();
        retained.extend(web_ids);

        let deleted = self.working_dir.prune(&retained)?;
        self.images_retained = known.len();

        // The old stack may still evict by its stale admission order.
        self.slot.replace(self.bootstrap_stack());
        if unknown.is_empty() {
            self.images_to_generate = 0;
        }
        let report = ReconfigurationReport {
            kept: known.len(),
            new: unknown.len(),
            deleted,
            web_retained,
        };
        let count = unknown.len();
        self.generate_images(unknown, count)?;
        self.finalize_setup()?;

        tracing::info!(
            kept = report.kept,
            new = report.new,
            deleted = report.deleted,
            web = report.web_retained,
            "reconfiguration complete"
        );
        Ok(Some(report))
    }

    /// Block until the current worker (if any) stops. Returns whether it
    /// has.
    pub fn wait_for_generation(&self, timeout: Option<Duration>) -> bool {
        self.worker
            .as_ref()
            .is_none_or(|worker| worker.wait_until_stopped(timeout))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn working_dir(&self) -> &Path {
        self.working_dir.path()
    }

    pub fn index(&self) -> Arc<ImageIndex> {
        Arc::clone(&self.index)
    }

    pub fn id_factory(&self) -> Arc<ImageIdFactory> {
        Arc::clone(&self.ids)
    }

    pub fn worker(&self) -> Option<Arc<GenerationWorker>> {
        self.worker.clone()
    }

    /// The stack built by the last `finalize_setup`.
    pub fn storage(&self) -> Option<Arc<dyn StorageBackend>> {
        self.stack.clone()
    }

    pub fn product_ids(&self) -> &[u64] {
        &self.product_ids
    }

    pub fn images_to_generate(&self) -> usize {
        self.images_to_generate
    }

    pub fn images_pre_existing(&self) -> usize {
        self.images_pre_existing
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.storage_mode
    }

    pub fn storage_rule(&self) -> StorageRule {
        self.storage_rule
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn cache_rule(&self) -> CacheRule {
        self.cache_rule
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// File-count bound for limited drive storage.
    pub fn storage_ceiling(&self) -> usize {
        self.images_to_generate + self.images_pre_existing + self.images_retained
    }

    fn bootstrap_stack(&self) -> Arc<dyn StorageBackend> {
        Arc::new(DriveStorage::new(
            self.working_dir.clone(),
            Arc::clone(&self.index),
            self.storage_rule,
        ))
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            index: Arc::clone(&self.index),
            slot: Arc::clone(&self.slot),
            ids: Arc::clone(&self.ids),
            synthesizer: Arc::clone(&self.synthesizer),
        }
    }
}

fn open_working_dir(path: PathBuf) -> Result<WorkingDir, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "working directory",
            reason: "path is empty".into(),
        });
    }
    WorkingDir::create(&path).map_err(|e| ConfigError::InvalidValue {
        key: "working directory",
        reason: format!("{} could not be created: {e}", path.display()),
    })
}

fn parse_setting<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|reason| ConfigError::InvalidValue { key, reason })
}

/// `label` for a `<label>.png` file, `None` for anything else.
fn asset_label(path: &Path) -> Option<String> {
    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ImageFormatTag::STORE.extension()));
    if !is_png {
        return None;
    }
    let label = path.file_stem()?.to_str()?;
    (!label.is_empty()).then(|| label.to_string())
}
