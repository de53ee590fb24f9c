//! Unbounded drive-backed storage.

use super::{StorageBackend, StorageError, WorkingDir, read_record, resolve};
use crate::index::ImageIndex;
use crate::rules::{AdmissionRule, StorageRule};
use crate::types::{ImageId, ImageRecord, SizeVariant, SubjectKey};
use std::sync::Arc;

/// Writes every record its [`StorageRule`] admits to the working directory.
pub struct DriveStorage {
    dir: WorkingDir,
    index: Arc<ImageIndex>,
    rule: StorageRule,
}

impl DriveStorage {
    pub fn new(dir: WorkingDir, index: Arc<ImageIndex>, rule: StorageRule) -> Self {
        Self { dir, index, rule }
    }

    pub fn working_dir(&self) -> &WorkingDir {
        &self.dir
    }
}

impl StorageBackend for DriveStorage {
    fn put(&self, record: Arc<ImageRecord>) -> Result<bool, StorageError> {
        if !self.rule.admits(&record) {
            tracing::debug!(id = record.id, variant = %record.variant, "storage rule rejected image");
            return Ok(false);
        }
        self.dir.write_atomic(record.id, &record.bytes)?;
        Ok(true)
    }

    fn get(&self, subject: &SubjectKey, variant: SizeVariant) -> Result<Arc<ImageRecord>, StorageError> {
        let id = resolve(&self.index, subject, variant)?;
        self.load(id)
    }

    fn load(&self, id: ImageId) -> Result<Arc<ImageRecord>, StorageError> {
        read_record(&self.dir, &self.index, id)
    }

    fn contains(&self, subject: &SubjectKey, variant: SizeVariant) -> bool {
        self.index
            .image_id(subject, variant)
            .is_some_and(|id| self.dir.contains(id))
    }
}
