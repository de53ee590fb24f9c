//! The working directory: one file per stored image, named by its id.
//!
//! Writes go to `<id>.tmp` first and are renamed into place, so a reader
//! either finds the whole payload under `<id>` or no file at all. The temp
//! file is removed on every error path.

use crate::types::ImageId;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const TEMP_SUFFIX: &str = "tmp";

#[derive(Debug, Clone)]
pub struct WorkingDir {
    root: PathBuf,
}

impl WorkingDir {
    /// Open `root`, creating it if needed.
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Handle on `root` without touching the filesystem.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, id: ImageId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Durably write `bytes` as image `id`, replacing any previous payload.
    pub fn write_atomic(&self, id: ImageId, bytes: &[u8]) -> io::Result<()> {
        // Reconfiguration may have removed an emptied directory.
        fs::create_dir_all(&self.root)?;

        let final_path = self.file_path(id);
        let temp_path = final_path.with_extension(TEMP_SUFFIX);

        let result = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &final_path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    pub fn read(&self, id: ImageId) -> io::Result<Vec<u8>> {
        fs::read(self.file_path(id))
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.file_path(id).is_file()
    }

    /// Remove image `id`. Returns `false` if there was no such file.
    pub fn remove(&self, id: ImageId) -> io::Result<bool> {
        match fs::remove_file(self.file_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Ids of all stored images, ascending. Files whose name is not a
    /// decimal id (temp files, strays) are ignored.
    pub fn list_ids(&self) -> io::Result<Vec<ImageId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<ImageId>().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Delete every stored image whose id is not in `retain`, then remove the
    /// directory if nothing is left in it. Returns the number of files
    /// deleted. A file that cannot be removed is logged and skipped.
    pub fn prune(&self, retain: &HashSet<ImageId>) -> io::Result<usize> {
        let mut deleted = 0;
        for id in self.list_ids()? {
            if retain.contains(&id) {
                continue;
            }
            match self.remove(id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(id, error = %e, "could not delete unused image"),
            }
        }
        self.remove_if_empty()?;
        Ok(deleted)
    }

    /// Delete every file in the directory and the directory itself.
    pub fn delete_all(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn remove_if_empty(&self) -> io::Result<()> {
        let mut entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if entries.next().is_none() {
            fs::remove_dir(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();

        dir.write_atomic(42, b"payload").unwrap();

        assert_eq!(dir.read(42).unwrap(), b"payload");
        assert!(dir.contains(42));
        assert!(!dir.file_path(42).with_extension(TEMP_SUFFIX).exists());
    }

    #[test]
    fn write_recreates_removed_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        std::fs::remove_dir(dir.path()).unwrap();

        dir.write_atomic(1, b"x").unwrap();
        assert!(dir.contains(1));
    }

    #[test]
    fn failed_write_leaves_no_files() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        // A directory squatting on the final name makes the rename fail.
        std::fs::create_dir(dir.file_path(7)).unwrap();
        std::fs::write(dir.file_path(7).join("inner"), b"x").unwrap();

        assert!(dir.write_atomic(7, b"data").is_err());
        assert!(!dir.file_path(7).with_extension(TEMP_SUFFIX).exists());
    }

    #[test]
    fn list_ids_skips_non_numeric_names() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path()).unwrap();
        dir.write_atomic(3, b"a").unwrap();
        dir.write_atomic(1, b"b").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"c").unwrap();
        std::fs::write(tmp.path().join("9.tmp"), b"d").unwrap();

        assert_eq!(dir.list_ids().unwrap(), vec![1, 3]);
    }

    #[test]
    fn list_ids_of_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::at(tmp.path().join("never-created"));
        assert!(dir.list_ids().unwrap().is_empty());
    }

    #[test]
    fn prune_keeps_retained_and_removes_rest() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        for id in 1..=4 {
            dir.write_atomic(id, b"x").unwrap();
        }

        let deleted = dir.prune(&HashSet::from([2, 4])).unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(dir.list_ids().unwrap(), vec![2, 4]);
        assert!(dir.path().exists());
    }

    #[test]
    fn prune_everything_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        dir.write_atomic(1, b"x").unwrap();

        dir.prune(&HashSet::new()).unwrap();
        assert!(!dir.path().exists());
    }

    #[test]
    fn remove_reports_missing_file() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path()).unwrap();
        dir.write_atomic(5, b"x").unwrap();
        assert!(dir.remove(5).unwrap());
        assert!(!dir.remove(5).unwrap());
    }

    #[test]
    fn delete_all_removes_directory_and_tolerates_absence() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkingDir::create(tmp.path().join("images")).unwrap();
        dir.write_atomic(1, b"x").unwrap();
        std::fs::write(dir.path().join("stray"), b"y").unwrap();

        dir.delete_all().unwrap();
        assert!(!dir.path().exists());
        dir.delete_all().unwrap();
    }
}
