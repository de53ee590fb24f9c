//! Drive-backed storage bounded by a file count.
//!
//! The ceiling is computed by setup as `images_to_generate +
//! images_pre_existing + images_retained`, the last being the product
//! images a reconfiguration kept. Once that many files are admitted, each
//! new admission first removes the file that was admitted earliest. Order is
//! by admission, not by id and not by last access. Files already in the
//! directory when the storage is built count as admitted, oldest id first.
//! Building never deletes anything, even when more files than the ceiling
//! are present; the surplus goes on the next admission.

use super::{StorageBackend, StorageError, WorkingDir, read_record, resolve};
use crate::index::ImageIndex;
use crate::rules::{AdmissionRule, StorageRule};
use crate::types::{ImageId, ImageRecord, SizeVariant, SubjectKey};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

pub struct LimitedDriveStorage {
    dir: WorkingDir,
    index: Arc<ImageIndex>,
    rule: StorageRule,
    ceiling: usize,
    admitted: Mutex<VecDeque<ImageId>>,
}

impl LimitedDriveStorage {
    pub fn new(
        dir: WorkingDir,
        index: Arc<ImageIndex>,
        rule: StorageRule,
        ceiling: usize,
    ) -> io::Result<Self> {
        let admitted: VecDeque<ImageId> = dir.list_ids()?.into();
        if admitted.len() > ceiling {
            tracing::debug!(stored = admitted.len(), ceiling, "working directory above ceiling");
        }

        Ok(Self {
            dir,
            index,
            rule,
            ceiling,
            admitted: Mutex::new(admitted),
        })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Number of images currently admitted to disk.
    pub fn stored_count(&self) -> usize {
        self.admitted.lock().expect("admission queue lock poisoned").len()
    }
}

impl StorageBackend for LimitedDriveStorage {
    fn put(&self, record: Arc<ImageRecord>) -> Result<bool, StorageError> {
        if self.ceiling == 0 || !self.rule.admits(&record) {
            return Ok(false);
        }

        // Held across the write so the file count never overshoots.
        let mut admitted = self.admitted.lock().expect("admission queue lock poisoned");
        if admitted.contains(&record.id) {
            self.dir.write_atomic(record.id, &record.bytes)?;
            return Ok(true);
        }

        while admitted.len() >= self.ceiling {
            let Some(oldest) = admitted.pop_front() else {
                break;
            };
            match self.dir.remove(oldest) {
                Ok(_) => tracing::debug!(evicted = oldest, admitted = record.id, "storage ceiling reached"),
                Err(e) => tracing::warn!(id = oldest, error = %e, "could not evict stored image"),
            }
        }

        self.dir.write_atomic(record.id, &record.bytes)?;
        admitted.push_back(record.id);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::record;
    use tempfile::TempDir;

    fn limited(tmp: &TempDir, ceiling: usize) -> (LimitedDriveStorage, WorkingDir, Arc<ImageIndex>) {
        let index = Arc::new(ImageIndex::new());
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        let storage =
            LimitedDriveStorage::new(dir.clone(), Arc::clone(&index), StorageRule::All, ceiling).unwrap();
        (storage, dir, index)
    }

    #[test]
    fn overflow_evicts_earliest_admitted() {
        let tmp = TempDir::new().unwrap();
        let (storage, dir, _) = limited(&tmp, 3);

        // Admission order differs from id order on purpose.
        for id in [30, 10, 20] {
            assert!(storage.put(Arc::new(record(id, SizeVariant::Full))).unwrap());
        }
        assert!(storage.put(Arc::new(record(40, SizeVariant::Full))).unwrap());

        assert_eq!(dir.list_ids().unwrap(), vec![10, 20, 40]);
        assert_eq!(storage.stored_count(), 3);
    }

    #[test]
    fn file_count_never_exceeds_ceiling() {
        let tmp = TempDir::new().unwrap();
        let (storage, dir, _) = limited(&tmp, 4);

        for id in 1..=25 {
            storage.put(Arc::new(record(id, SizeVariant::Full))).unwrap();
            assert!(dir.list_ids().unwrap().len() <= 4);
        }
        assert_eq!(dir.list_ids().unwrap(), vec![22, 23, 24, 25]);
    }

    #[test]
    fn rewriting_an_admitted_id_does_not_evict() {
        let tmp = TempDir::new().unwrap();
        let (storage, dir, _) = limited(&tmp, 2);
        storage.put(Arc::new(record(1, SizeVariant::Full))).unwrap();
        storage.put(Arc::new(record(2, SizeVariant::Full))).unwrap();

        storage.put(Arc::new(record(2, SizeVariant::Full))).unwrap();
        assert_eq!(dir.list_ids().unwrap(), vec![1, 2]);
    }

    #[test]
    fn existing_files_count_as_admitted_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        for id in [5, 6, 7] {
            dir.write_atomic(id, b"x").unwrap();
        }

        let storage =
            LimitedDriveStorage::new(dir.clone(), Arc::new(ImageIndex::new()), StorageRule::All, 2).unwrap();
        assert_eq!(dir.list_ids().unwrap(), vec![5, 6, 7]);
        assert_eq!(storage.stored_count(), 3);

        // The next admission brings the count back under the ceiling.
        storage.put(Arc::new(record(8, SizeVariant::Full))).unwrap();
        assert_eq!(dir.list_ids().unwrap(), vec![7, 8]);
    }

    #[test]
    fn zero_ceiling_admits_nothing() {
        let tmp = TempDir::new().unwrap();
        let (storage, dir, _) = limited(&tmp, 0);
        assert!(!storage.put(Arc::new(record(1, SizeVariant::Full))).unwrap());
        assert!(dir.list_ids().unwrap().is_empty());
    }

    #[test]
    fn evicted_image_reads_as_missing() {
        let tmp = TempDir::new().unwrap();
        let (storage, _, index) = limited(&tmp, 1);
        storage.put(Arc::new(record(1, SizeVariant::Full))).unwrap();
        index.set_mapping(100u64, 1, SizeVariant::Full).unwrap();
        storage.put(Arc::new(record(2, SizeVariant::Full))).unwrap();
        index.set_mapping(200u64, 2, SizeVariant::Full).unwrap();

        assert!(storage.get(&SubjectKey::Product(100), SizeVariant::Full).unwrap_err().is_not_found());
        assert_eq!(storage.get(&SubjectKey::Product(200), SizeVariant::Full).unwrap().id, 2);
        assert!(!storage.contains(&SubjectKey::Product(100), SizeVariant::Full));
    }

    #[test]
    fn rule_rejection_leaves_queue_untouched() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(ImageIndex::new());
        let dir = WorkingDir::create(tmp.path()).unwrap();
        let storage = LimitedDriveStorage::new(dir, index, StorageRule::FullSize, 1).unwrap();

        storage.put(Arc::new(record(1, SizeVariant::Full))).unwrap();
        assert!(!storage.put(Arc::new(record(2, SizeVariant::Icon))).unwrap());
        assert_eq!(storage.stored_count(), 1);
    }
}
