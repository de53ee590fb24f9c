//! Durable image storage.
//!
//! | Type | Role |
//! |---|---|
//! | [`StorageBackend`] | Contract shared by every tier, including the cache layer |
//! | [`WorkingDir`] | Atomic id-named file I/O under one directory |
//! | [`DriveStorage`] | Persists every admitted record, no bound |
//! | [`LimitedDriveStorage`] | Persists admitted records up to a file-count ceiling, oldest out first |
//! | [`StorageSlot`] | Swappable handle on the current stack, shared with the generation worker |
//!
//! Backends never create mappings. The caller stores a record first and
//! registers it in the [`ImageIndex`] afterwards, so any id reachable through
//! the index already has its payload on disk.

mod drive;
mod limited;
mod workdir;

pub use drive::DriveStorage;
pub use limited::LimitedDriveStorage;
pub use workdir::WorkingDir;

use crate::index::ImageIndex;
use crate::rules::StorageRule;
use crate::types::{ImageFormatTag, ImageId, ImageRecord, SizeVariant, SubjectKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no image for {subject} at {variant}")]
    NotFound {
        subject: SubjectKey,
        variant: SizeVariant,
    },
    #[error("no stored payload for image {0}")]
    Missing(ImageId),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. } | StorageError::Missing(_))
    }
}

/// Contract for every tier of the read stack.
///
/// Implementations are shared across the generation worker and request
/// threads, so all methods take `&self` and synchronize internally.
pub trait StorageBackend: Send + Sync {
    /// Offer `record` to the tier. Returns whether its payload is now on
    /// disk. An in-memory copy alone does not count, so callers only map
    /// records this returns `true` for.
    fn put(&self, record: Arc<ImageRecord>) -> Result<bool, StorageError>;

    /// Fetch the image mapped to `subject` at `variant`.
    fn get(&self, subject: &SubjectKey, variant: SizeVariant) -> Result<Arc<ImageRecord>, StorageError>;

    /// Fetch a mapped image by id.
    fn load(&self, id: ImageId) -> Result<Arc<ImageRecord>, StorageError>;

    fn contains(&self, subject: &SubjectKey, variant: SizeVariant) -> bool;
}

/// How the working directory is bounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    #[default]
    Drive,
    DriveLimited,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "drive" => Ok(StorageMode::Drive),
            "drive-limited" | "limited" => Ok(StorageMode::DriveLimited),
            other => Err(format!("unknown storage mode '{other}'")),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageMode::Drive => "drive",
            StorageMode::DriveLimited => "drive-limited",
        })
    }
}

/// Build the backend for `mode`. `ceiling` only applies to
/// [`StorageMode::DriveLimited`].
pub fn build_storage(
    mode: StorageMode,
    dir: WorkingDir,
    index: Arc<ImageIndex>,
    rule: StorageRule,
    ceiling: usize,
) -> io::Result<Arc<dyn StorageBackend>> {
    Ok(match mode {
        StorageMode::Drive => Arc::new(DriveStorage::new(dir, index, rule)),
        StorageMode::DriveLimited => Arc::new(LimitedDriveStorage::new(dir, index, rule, ceiling)?),
    })
}

/// The stack the generation worker writes through.
///
/// Setup replaces the stack while a worker may be running. Writes go through
/// [`put`](Self::put), which holds the slot's read lock for the whole write,
/// and [`rebuild`](Self::rebuild) builds the replacement under the write
/// lock. A new stack therefore sees every file an earlier write produced,
/// and no write lands on a stack after it was swapped out.
pub struct StorageSlot {
    current: RwLock<Arc<dyn StorageBackend>>,
}

impl StorageSlot {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            current: RwLock::new(backend),
        }
    }

    pub fn current(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.current.read().expect("storage slot lock poisoned"))
    }

    /// Install `backend`, returning the stack it replaced.
    pub fn replace(&self, backend: Arc<dyn StorageBackend>) -> Arc<dyn StorageBackend> {
        let mut current = self.current.write().expect("storage slot lock poisoned");
        std::mem::replace(&mut *current, backend)
    }

    /// Store `record` through the current stack. Rebuilds wait for it.
    pub fn put(&self, record: Arc<ImageRecord>) -> Result<bool, StorageError> {
        let current = self.current.read().expect("storage slot lock poisoned");
        current.put(record)
    }

    /// Build a new stack with no write in flight and install it. On error
    /// the current stack stays.
    pub fn rebuild<E>(
        &self,
        build: impl FnOnce() -> Result<Arc<dyn StorageBackend>, E>,
    ) -> Result<Arc<dyn StorageBackend>, E> {
        let mut current = self.current.write().expect("storage slot lock poisoned");
        let stack = build()?;
        *current = Arc::clone(&stack);
        Ok(stack)
    }
}

/// Resolve `subject`/`variant` to an id through `index`.
pub(crate) fn resolve(
    index: &ImageIndex,
    subject: &SubjectKey,
    variant: SizeVariant,
) -> Result<ImageId, StorageError> {
    index
        .image_id(subject, variant)
        .ok_or_else(|| StorageError::NotFound {
            subject: subject.clone(),
            variant,
        })
}

/// Read image `id` from `dir`, recovering its variant from `index`.
///
/// An id without a mapping is reported as missing even if its file exists:
/// payloads only become visible once registered.
pub(crate) fn read_record(
    dir: &WorkingDir,
    index: &ImageIndex,
    id: ImageId,
) -> Result<Arc<ImageRecord>, StorageError> {
    let (_, variant) = index.subject_of(id).ok_or(StorageError::Missing(id))?;
    let bytes = match dir.read(id) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::Missing(id)),
        Err(e) => return Err(e.into()),
    };
    let format = ImageFormatTag::sniff(&bytes).unwrap_or(ImageFormatTag::STORE);
    Ok(Arc::new(ImageRecord::new(id, variant, bytes, format)))
}
