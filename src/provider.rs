//! Collaborators at the edges of the image stack.
//!
//! | Trait | Shipped implementations |
//! |---|---|
//! | [`ProductSource`] | [`StaticProducts`], [`JsonFileProducts`] |
//! | [`ImageProvider`] | [`StoreImageProvider`] |
//!
//! A product source answers "which products exist right now"; `None` means
//! the upstream could not be reached, which callers treat as "do nothing
//! this time". The provider is the read side: setup hands it the finished
//! stack and index, and request threads read through it.

use crate::index::ImageIndex;
use crate::storage::{StorageBackend, StorageError};
use crate::types::{ImageRecord, SizeVariant, SubjectKey};
use crate::worker::GenerationWorker;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Source of the current product list.
pub trait ProductSource: Send + Sync {
    /// All product ids, or `None` if the upstream is unavailable.
    fn product_ids(&self) -> Option<Vec<u64>>;
}

/// In-memory product list, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticProducts {
    ids: Mutex<Option<Vec<u64>>>,
}

impl StaticProducts {
    pub fn new(ids: Vec<u64>) -> Self {
        Self {
            ids: Mutex::new(Some(ids)),
        }
    }

    /// A source whose upstream is down.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn replace(&self, ids: Option<Vec<u64>>) {
        *self.ids.lock().expect("product list lock poisoned") = ids;
    }
}

impl ProductSource for StaticProducts {
    fn product_ids(&self) -> Option<Vec<u64>> {
        self.ids.lock().expect("product list lock poisoned").clone()
    }
}

#[derive(Debug, Deserialize)]
struct ProductEntry {
    id: u64,
}

/// Products read from a JSON array of objects with an `id` field.
///
/// The file is re-read on every call, so pointing the source at a new file
/// (or rewriting it) is how a reconfiguration sees a new catalogue.
#[derive(Debug, Clone)]
pub struct JsonFileProducts {
    path: PathBuf,
}

impl JsonFileProducts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProductSource for JsonFileProducts {
    fn product_ids(&self) -> Option<Vec<u64>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "product list unavailable");
                return None;
            }
        };
        match serde_json::from_str::<Vec<ProductEntry>>(&content) {
            Ok(entries) => Some(entries.into_iter().map(|p| p.id).collect()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "product list unreadable");
                None
            }
        }
    }
}

/// Read-side receiver of the stack built by setup.
pub trait ImageProvider: Send + Sync {
    fn set_image_index(&self, index: Arc<ImageIndex>);
    fn set_storage(&self, storage: Arc<dyn StorageBackend>);
    fn set_generation_worker(&self, worker: Option<Arc<GenerationWorker>>);
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("image provider has not been set up")]
    NotReady,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Provider answering reads through the injected stack.
#[derive(Default)]
pub struct StoreImageProvider {
    index: RwLock<Option<Arc<ImageIndex>>>,
    storage: RwLock<Option<Arc<dyn StorageBackend>>>,
    worker: RwLock<Option<Arc<GenerationWorker>>>,
}

impl StoreImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.index.read().expect("provider lock poisoned").is_some()
            && self.storage.read().expect("provider lock poisoned").is_some()
    }

    /// The image for `subject` at `variant`.
    pub fn image(&self, subject: &SubjectKey, variant: SizeVariant) -> Result<Arc<ImageRecord>, ProviderError> {
        let storage = self
            .storage
            .read()
            .expect("provider lock poisoned")
            .clone()
            .ok_or(ProviderError::NotReady)?;
        Ok(storage.get(subject, variant)?)
    }

    /// Whether `subject` has a mapped image at `variant`, whether or not
    /// its payload is still stored.
    pub fn is_mapped(&self, subject: &SubjectKey, variant: SizeVariant) -> bool {
        self.index
            .read()
            .expect("provider lock poisoned")
            .as_ref()
            .is_some_and(|index| index.has_image(subject, variant))
    }

    /// Whether the last injected worker is still generating.
    pub fn generation_running(&self) -> bool {
        self.worker
            .read()
            .expect("provider lock poisoned")
            .as_ref()
            .is_some_and(|w| w.is_running())
    }
}

impl ImageProvider for StoreImageProvider {
    fn set_image_index(&self, index: Arc<ImageIndex>) {
        *self.index.write().expect("provider lock poisoned") = Some(index);
    }

    fn set_storage(&self, storage: Arc<dyn StorageBackend>) {
        *self.storage.write().expect("provider lock poisoned") = Some(storage);
    }

    fn set_generation_worker(&self, worker: Option<Arc<GenerationWorker>>) {
        *self.worker.write().expect("provider lock poisoned") = worker;
    }
}
